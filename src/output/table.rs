#![forbid(unsafe_code)]

use std::io;

/// Column-aligned plain-text table, also writable as CSV.
#[derive(Debug, Default)]
pub struct Table {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Table {
    pub fn new(headers: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            headers: headers.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    pub fn row(&mut self, cols: impl IntoIterator<Item = impl Into<String>>) {
        self.rows.push(cols.into_iter().map(Into::into).collect());
    }

    pub fn print(&self) -> io::Result<()> {
        self.write_aligned(io::stdout().lock())
    }

    pub fn print_csv(&self) -> io::Result<()> {
        self.write_csv(io::stdout().lock())
    }

    pub fn write_csv(&self, out: impl io::Write) -> io::Result<()> {
        let mut wtr = csv::Writer::from_writer(out);
        wtr.write_record(&self.headers)?;
        for row in &self.rows {
            wtr.write_record(row)?;
        }
        wtr.flush()
    }

    pub fn write_aligned(&self, mut out: impl io::Write) -> io::Result<()> {
        let widths = self.column_widths();
        for line in std::iter::once(&self.headers).chain(&self.rows) {
            let cells: Vec<String> = line
                .iter()
                .enumerate()
                .map(|(i, cell)| {
                    let pad = widths[i].saturating_sub(cell.chars().count());
                    format!("{cell}{}", " ".repeat(pad))
                })
                .collect();
            writeln!(out, "{}", cells.join("  ").trim_end())?;
        }
        Ok(())
    }

    fn column_widths(&self) -> Vec<usize> {
        let cols = std::iter::once(&self.headers)
            .chain(&self.rows)
            .map(Vec::len)
            .max()
            .unwrap_or(0);
        let mut widths = vec![0usize; cols];
        for line in std::iter::once(&self.headers).chain(&self.rows) {
            for (i, cell) in line.iter().enumerate() {
                widths[i] = widths[i].max(cell.chars().count());
            }
        }
        widths
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aligns_columns() {
        let mut t = Table::new(["ID", "TITLE"]);
        t.row(["a1", "Buy milk"]);
        t.row(["abcdef", "x"]);
        let mut out = Vec::new();
        t.write_aligned(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text, "ID      TITLE\na1      Buy milk\nabcdef  x\n");
    }

    #[test]
    fn csv_quotes_commas() {
        let mut t = Table::new(["id", "title"]);
        t.row(["a1", "eggs, milk"]);
        let mut out = Vec::new();
        t.write_csv(&mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "id,title\na1,\"eggs, milk\"\n");
    }
}
