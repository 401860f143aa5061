/// Buffered result set of a query.
///
/// Columns are looked up by name, ignoring case, because column order is not stable across
/// server versions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
}

impl QueryResult {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Option<String>>>) -> Self {
        Self { columns, rows }
    }

    /// Builds a result from string literals. `None` cells are SQL `NULL`.
    pub fn from_rows<C, R>(columns: &[&str], rows: R) -> Self
    where
        R: IntoIterator<Item = C>,
        C: IntoIterator<Item = Option<&'static str>>,
    {
        Self {
            columns: columns.iter().map(|column| (*column).to_owned()).collect(),
            rows: rows
                .into_iter()
                .map(|row| row.into_iter().map(|cell| cell.map(str::to_owned)).collect())
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Returns the position of the column named `name`, ignoring case.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|column| column.eq_ignore_ascii_case(name))
    }

    /// Returns the cell at `row` and column position `column`, `None` for `NULL` or out of range.
    pub fn cell(&self, row: usize, column: usize) -> Option<&str> {
        self.rows.get(row)?.get(column)?.as_deref()
    }

    /// Returns the cell at `row` in the column named `name`.
    pub fn value(&self, row: usize, name: &str) -> Option<&str> {
        self.cell(row, self.column_index(name)?)
    }
}
