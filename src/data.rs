use crate::error::{Error, Result};
use miette::{ensure, miette, IntoDiagnostic, WrapErr};
use serde::Serialize;

#[derive(Debug, Clone, Default, Serialize)]
pub struct Headers(Vec<String>);

/// Column oriented sample data.
///
/// Independent variable columns come first, in declared order, followed by one column per model
/// component.
#[derive(Debug, Clone)]
pub struct SampleData {
    hdrs: Headers,
    cols: Vec<Vec<f64>>,
}

impl Headers {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, idx: usize) -> Option<&str> {
        self.0.get(idx).map(String::as_str)
    }

    pub fn iter(&self) -> impl ExactSizeIterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl<T: AsRef<str>> FromIterator<T> for Headers {
    fn from_iter<I: IntoIterator<Item = T>>(i: I) -> Self {
        Headers(
            i.into_iter()
                .map(|t| t.as_ref().trim().to_string())
                .collect(),
        )
    }
}

impl SampleData {
    /// Column data without headers. Columns must all be the same length.
    pub fn new(cols: Vec<Vec<f64>>) -> Result<Self> {
        let hdrs = (0..cols.len()).map(|i| format!("col{i}")).collect();
        Self::with_headers(hdrs, cols)
    }

    pub fn with_headers(hdrs: Headers, cols: Vec<Vec<f64>>) -> Result<Self> {
        if hdrs.len() != cols.len() {
            return Err(Error::DimensionMismatch {
                expected: hdrs.len(),
                actual: cols.len(),
            });
        }

        if let Some(first) = cols.first() {
            let expected = first.len();
            if let Some((column, c)) = cols.iter().enumerate().find(|(_, c)| c.len() != expected) {
                return Err(Error::RaggedData {
                    column,
                    len: c.len(),
                    expected,
                });
            }
        }

        Ok(Self { hdrs, cols })
    }

    /// The number of columns.
    pub fn width(&self) -> usize {
        self.cols.len()
    }

    /// Returns the length of the number of observation rows.
    pub fn len(&self) -> usize {
        self.cols.first().map(Vec::len).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn headers(&self) -> &Headers {
        &self.hdrs
    }

    pub fn column(&self, idx: usize) -> Option<&[f64]> {
        self.cols.get(idx).map(Vec::as_slice)
    }

    pub fn columns(&self) -> &[Vec<f64>] {
        &self.cols
    }
}

pub struct CsvReader {
    rdr: csv::Reader<Box<dyn std::io::Read>>,
    hdrs: Option<Headers>,
}

impl CsvReader {
    pub fn new<R: std::io::Read + 'static>(rdr: R) -> Self {
        Self {
            rdr: csv::ReaderBuilder::new()
                .trim(csv::Trim::All)
                .from_reader(Box::new(rdr)),
            hdrs: None,
        }
    }

    fn read_headers(&mut self) -> miette::Result<()> {
        let hdrs = self
            .rdr
            .headers()
            .into_diagnostic()
            .wrap_err("failed to read CSV header row")?;

        ensure!(!hdrs.is_empty(), "headers row is empty");

        self.hdrs = Some(hdrs.iter().collect());
        Ok(())
    }

    pub fn headers(&mut self) -> miette::Result<&Headers> {
        if self.hdrs.is_none() {
            self.read_headers()?;
        }

        self.hdrs
            .as_ref()
            .ok_or_else(|| miette!("headers should be read"))
    }

    pub fn into_data(self) -> miette::Result<SampleData> {
        SampleData::try_from(self)
    }
}

impl TryFrom<CsvReader> for SampleData {
    type Error = miette::Report;

    fn try_from(mut rdr: CsvReader) -> miette::Result<SampleData> {
        let width = rdr.headers()?.len(); // ensure headers is read in

        let mut cols = vec![Vec::new(); width];

        for (i, row) in rdr.rdr.records().enumerate() {
            let row = row
                .into_diagnostic()
                .wrap_err_with(|| format!("failed to read row {} in CSV", i + 1))?;

            for (j, cell) in row.iter().enumerate() {
                ensure!(
                    !cell.is_empty(),
                    "empty cell in column index {j} in row index {}",
                    i + 1
                );

                let x = cell
                    .parse::<f64>()
                    .into_diagnostic()
                    .wrap_err_with(|| format!("in column index {j}"))
                    .wrap_err_with(|| format!("in row index {}", i + 1))?;

                cols[j].push(x);
            }
        }

        ensure!(cols.iter().any(|c| !c.is_empty()), "CSV has no data rows");

        let hdrs = rdr.hdrs.take().unwrap_or_default();

        Ok(SampleData::with_headers(hdrs, cols)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_columns() {
        let csv = "t, y\n0, 1\n1, 3\n2, 5\n";
        let data = CsvReader::new(std::io::Cursor::new(csv)).into_data().unwrap();
        assert_eq!(data.width(), 2);
        assert_eq!(data.len(), 3);
        assert_eq!(data.headers().get(1), Some("y"));
        assert_eq!(data.column(0), Some(&[0., 1., 2.][..]));
        assert_eq!(data.column(1), Some(&[1., 3., 5.][..]));
    }

    #[test]
    fn rejects_non_numeric() {
        let csv = "t,y\n0,1\n1,abc\n";
        let err = CsvReader::new(std::io::Cursor::new(csv))
            .into_data()
            .unwrap_err();
        assert_eq!(err.to_string(), "in row index 2");
    }

    #[test]
    fn rejects_empty_cells() {
        let csv = "t,y\n0,1\n1,\n";
        assert!(CsvReader::new(std::io::Cursor::new(csv)).into_data().is_err());
    }

    #[test]
    fn rejects_no_rows() {
        let csv = "t,y\n";
        assert!(CsvReader::new(std::io::Cursor::new(csv)).into_data().is_err());
    }

    #[test]
    fn ragged_columns() {
        let err = SampleData::new(vec![vec![1., 2.], vec![1.]]).unwrap_err();
        assert!(matches!(
            err,
            Error::RaggedData {
                column: 1,
                len: 1,
                expected: 2
            }
        ));
    }
}
