use super::core::Buffer;

/// The mappers × reducers grid of record buffers.
///
/// Ownership follows the phase structure instead of locks: every mapper
/// worker builds and exclusively owns one row during the map stage, the
/// rows are collected at the stage barrier, and `into_columns` transposes
/// the grid so each reducer worker takes exclusive ownership of its
/// column.
///
///                          0   1   2
///                        +---+---+---+
///                      0 |b00|b01|b02|
///                        +---+---+---+
/// mapper[1] - write -> 1 |b10|b11|b12|
///                        +---+---+---+
///                      2 |b20|b21|b22|
///                        +---+---+---+
///                              |
///                              +- read -> reducer[1]
pub struct BufferMatrix {
    rows: Vec<Vec<Buffer>>,
}

impl BufferMatrix {
    /// Assemble the matrix from the per-mapper rows returned by the map
    /// stage. Every row must have one buffer per reducer.
    pub fn from_rows(rows: Vec<Vec<Buffer>>) -> BufferMatrix {
        debug_assert!(rows.windows(2).all(|w| w[0].len() == w[1].len()));
        BufferMatrix { rows }
    }

    pub fn mappers(&self) -> usize {
        self.rows.len()
    }

    pub fn reducers(&self) -> usize {
        self.rows.first().map_or(0, |r| r.len())
    }

    /// Transpose into per-reducer columns, moving the buffers. Column `j`
    /// holds the buffers written for reducer `j` by mappers 0..M in order.
    pub fn into_columns(self) -> Vec<Vec<Buffer>> {
        let mappers = self.mappers();
        let reducers = self.reducers();

        let mut columns: Vec<Vec<Buffer>> = (0..reducers)
            .map(|_| Vec::with_capacity(mappers))
            .collect();
        for row in self.rows {
            for (j, buffer) in row.into_iter().enumerate() {
                columns[j].push(buffer);
            }
        }
        columns
    }
}
