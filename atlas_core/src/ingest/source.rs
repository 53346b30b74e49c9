//! Record sources: header-driven CSV and on-disk fixture directories.

use crate::ingest::models::{LoadDescriptor, RawRecord};
use crate::{Error, Result};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

/// Lazily reads CSV rows as `RawRecord`s keyed by the header row.
///
/// Short rows simply lack the trailing fields. The first read error ends the
/// sequence after being yielded once.
pub struct CsvRecordSource<R: Read> {
    reader: csv::Reader<R>,
    headers: csv::StringRecord,
    row: csv::StringRecord,
    done: bool,
}

impl CsvRecordSource<File> {
    #[tracing::instrument(level = "debug")]
    pub fn from_path(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .map_err(|e| Error::backend(format!("open csv {}", path.display()), e))?;
        Self::from_reader(file)
    }
}

impl<R: Read> CsvRecordSource<R> {
    pub fn from_reader(reader: R) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .trim(csv::Trim::Headers)
            .from_reader(reader);
        let headers = reader
            .headers()
            .map_err(|e| Error::backend("read csv headers", e))?
            .clone();
        Ok(Self {
            reader,
            headers,
            row: csv::StringRecord::new(),
            done: false,
        })
    }

    pub fn headers(&self) -> impl Iterator<Item = &str> {
        self.headers.iter()
    }
}

impl<R: Read> Iterator for CsvRecordSource<R> {
    type Item = Result<RawRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.reader.read_record(&mut self.row) {
            Ok(true) => Some(Ok(self
                .headers
                .iter()
                .zip(self.row.iter())
                .collect::<RawRecord>())),
            Ok(false) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                let line = e.position().map(|p| p.line()).unwrap_or_default();
                Some(Err(Error::backend(format!("read csv row (line {line})"), e)))
            }
        }
    }
}

/// A fixture directory: `mapping.yaml` (the load descriptor) next to
/// `data.csv` (the rows).
#[derive(Debug, Clone)]
pub struct Fixture {
    pub dir: PathBuf,
    pub descriptor: LoadDescriptor,
}

impl Fixture {
    pub const DESCRIPTOR_FILE: &'static str = "mapping.yaml";
    pub const DATA_FILE: &'static str = "data.csv";

    #[tracing::instrument(level = "debug")]
    pub async fn open(dir: &Path) -> Result<Self> {
        let is_dir = tokio::fs::metadata(dir)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false);
        if !is_dir {
            return Err(Error::Validation(format!(
                "no such fixture directory: {}",
                dir.display()
            )));
        }

        let descriptor_path = dir.join(Self::DESCRIPTOR_FILE);
        let text = tokio::fs::read_to_string(&descriptor_path)
            .await
            .map_err(|e| Error::backend(format!("read {}", descriptor_path.display()), e))?;
        let descriptor = LoadDescriptor::from_yaml_str(&text)?;

        Ok(Self {
            dir: dir.to_path_buf(),
            descriptor,
        })
    }

    pub fn records(&self) -> Result<CsvRecordSource<File>> {
        CsvRecordSource::from_path(&self.dir.join(Self::DATA_FILE))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_are_keyed_by_trimmed_headers() {
        let data = "name , category,selector\nJohn Smith,person,JS-1\nJane Doe\n";
        let rows: Vec<RawRecord> = CsvRecordSource::from_reader(data.as_bytes())
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get("name"), Some("John Smith"));
        assert_eq!(rows[0].get("selector"), Some("JS-1"));
        assert_eq!(rows[1].get("name"), Some("Jane Doe"));
        assert_eq!(rows[1].get("category"), None);
    }

    #[test]
    fn invalid_utf8_row_yields_one_error_then_stops() {
        let mut data = b"label\nok\n".to_vec();
        data.extend_from_slice(&[0xff, 0xfe, b'\n']);
        data.extend_from_slice(b"after\n");

        let mut source = CsvRecordSource::from_reader(data.as_slice()).unwrap();
        assert!(source.next().unwrap().is_ok());
        assert!(source.next().unwrap().is_err());
        assert!(source.next().is_none());
    }

    #[tokio::test]
    async fn missing_fixture_directory_is_a_validation_error() {
        let err = Fixture::open(Path::new("/definitely/not/here"))
            .await
            .unwrap_err();
        assert!(err.is_validation());
    }
}
