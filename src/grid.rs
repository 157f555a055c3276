use std::fmt::{self, Display};

/// One point of the sweep.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HyperParams {
    pub batch_size: usize,
    pub learning_rate: f32,
    pub epochs: usize,
}

impl Display for HyperParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Batch Size={}, Learning Rate={}, Epochs={}",
            self.batch_size, self.learning_rate, self.epochs
        )
    }
}

/// The Cartesian product of the three hyperparameter lists.
///
/// Iteration is lexicographic over (batch size, learning rate, epochs) following each list's
/// declared order, nothing is deduplicated.
#[derive(Debug, Clone, PartialEq)]
pub struct Grid {
    batch_sizes: Vec<usize>,
    learning_rates: Vec<f32>,
    epochs: Vec<usize>,
}

impl Grid {
    pub fn new(batch_sizes: Vec<usize>, learning_rates: Vec<f32>, epochs: Vec<usize>) -> Self {
        Self {
            batch_sizes,
            learning_rates,
            epochs,
        }
    }

    /// The amount of combinations the grid yields.
    pub fn len(&self) -> usize {
        self.batch_sizes.len() * self.learning_rates.len() * self.epochs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = HyperParams> + '_ {
        self.batch_sizes.iter().flat_map(move |&batch_size| {
            self.learning_rates.iter().flat_map(move |&learning_rate| {
                self.epochs.iter().map(move |&epochs| HyperParams {
                    batch_size,
                    learning_rate,
                    epochs,
                })
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn default_grid() -> Grid {
        Grid::new(vec![32, 64, 128], vec![0.001, 0.0005, 0.01], vec![10, 20, 30])
    }

    #[test]
    fn visits_every_combination_once() {
        let grid = default_grid();
        let all: Vec<_> = grid.iter().collect();

        assert_eq!(grid.len(), 27);
        assert_eq!(all.len(), 27);

        for (i, a) in all.iter().enumerate() {
            assert!(all[i + 1..].iter().all(|b| a != b));
        }
    }

    #[test]
    fn order_is_lexicographic() {
        let all: Vec<_> = default_grid().iter().collect();

        let first = HyperParams {
            batch_size: 32,
            learning_rate: 0.001,
            epochs: 10,
        };
        let second = HyperParams { epochs: 20, ..first };
        let fourth = HyperParams {
            learning_rate: 0.0005,
            epochs: 10,
            ..first
        };
        let last = HyperParams {
            batch_size: 128,
            learning_rate: 0.01,
            epochs: 30,
        };

        assert_eq!(all[0], first);
        assert_eq!(all[1], second);
        assert_eq!(all[3], fourth);
        assert_eq!(all[9].batch_size, 64);
        assert_eq!(all[26], last);
    }

    #[test]
    fn duplicates_are_kept() {
        let grid = Grid::new(vec![8, 8], vec![0.1], vec![1]);
        assert_eq!(grid.iter().count(), 2);
    }

    #[test]
    fn an_empty_list_empties_the_grid() {
        let grid = Grid::new(vec![8], vec![], vec![1]);
        assert!(grid.is_empty());
        assert_eq!(grid.iter().count(), 0);
    }

    #[test]
    fn displays_like_the_log_lines() {
        let params = HyperParams {
            batch_size: 64,
            learning_rate: 0.0005,
            epochs: 20,
        };
        assert_eq!(
            params.to_string(),
            "Batch Size=64, Learning Rate=0.0005, Epochs=20"
        );
    }
}
