// Module for loading and validating the data. It reads the csv file, normalizes headers, skips
// unusable rows, and keeps the loaded table behind an explicit load-once cache.
use std::cell::OnceCell;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use csv::{ReaderBuilder, StringRecord};
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::error::{Result, RiskError};

/// Full names of the two schools in the survey, keyed by their code.
pub const SCHOOLS: [(&str, &str); 2] = [
    ("GP", "Gabriel Pereira"),
    ("MS", "Mousinho da Silveira"),
];

/// Maps a two-letter school code to its full name. Unknown codes have no label.
pub fn school_label(code: &str) -> Option<&'static str> {
    SCHOOLS.iter().find(|(c, _)| *c == code).map(|(_, name)| *name)
}

/// Inverse of [`school_label`]; also accepts a code as-is.
pub fn school_code(label_or_code: &str) -> Option<&'static str> {
    SCHOOLS
        .iter()
        .find(|(c, name)| *name == label_or_code || *c == label_or_code)
        .map(|(c, _)| *c)
}

/// Column names are made identifier-safe the same way for every source.
pub fn normalize_column(name: &str) -> String {
    name.trim().replace([' ', '-'], "_")
}

/// One feature cell, as seen by the encoder.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FeatureValue<'a> {
    Numeric(f64),
    Categorical(&'a str),
}

/// Matches the 33 columns of the student-performance table.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct StudentRecord {
    pub school: String,
    pub sex: String,
    pub age: u8,
    pub address: String,
    pub famsize: String,
    #[serde(rename = "Pstatus")]  pub pstatus: String,
    #[serde(rename = "Medu")]     pub medu: u8,
    #[serde(rename = "Fedu")]     pub fedu: u8,
    #[serde(rename = "Mjob")]     pub mjob: String,
    #[serde(rename = "Fjob")]     pub fjob: String,
    pub reason: String,
    pub guardian: String,
    pub traveltime: u8,
    pub studytime: u8,
    pub failures: u8,
    pub schoolsup: String,
    pub famsup: String,
    pub paid: String,
    pub activities: String,
    pub nursery: String,
    pub higher: String,
    pub internet: String,
    pub romantic: String,
    pub famrel: u8,
    pub freetime: u8,
    pub goout: u8,
    #[serde(rename = "Dalc")]     pub dalc: u8,
    #[serde(rename = "Walc")]     pub walc: u8,
    pub health: u8,
    pub absences: u16,
    #[serde(rename = "G1")]       pub g1: u8,
    #[serde(rename = "G2")]       pub g2: u8,
    #[serde(rename = "G3")]       pub g3: u8,
}

impl StudentRecord {
    /// Full school name derived from the school code.
    pub fn school_name(&self) -> Option<&'static str> {
        school_label(&self.school)
    }

    /// Final grade, the regression target.
    pub fn target(&self) -> f64 {
        self.g3 as f64
    }

    /// Every model input column in table order. The target (G3) is excluded.
    pub fn features(&self) -> Vec<(&'static str, FeatureValue<'_>)> {
        use FeatureValue::{Categorical as C, Numeric as N};
        vec![
            ("school", C(&self.school)),
            ("sex", C(&self.sex)),
            ("age", N(self.age as f64)),
            ("address", C(&self.address)),
            ("famsize", C(&self.famsize)),
            ("Pstatus", C(&self.pstatus)),
            ("Medu", N(self.medu as f64)),
            ("Fedu", N(self.fedu as f64)),
            ("Mjob", C(&self.mjob)),
            ("Fjob", C(&self.fjob)),
            ("reason", C(&self.reason)),
            ("guardian", C(&self.guardian)),
            ("traveltime", N(self.traveltime as f64)),
            ("studytime", N(self.studytime as f64)),
            ("failures", N(self.failures as f64)),
            ("schoolsup", C(&self.schoolsup)),
            ("famsup", C(&self.famsup)),
            ("paid", C(&self.paid)),
            ("activities", C(&self.activities)),
            ("nursery", C(&self.nursery)),
            ("higher", C(&self.higher)),
            ("internet", C(&self.internet)),
            ("romantic", C(&self.romantic)),
            ("famrel", N(self.famrel as f64)),
            ("freetime", N(self.freetime as f64)),
            ("goout", N(self.goout as f64)),
            ("Dalc", N(self.dalc as f64)),
            ("Walc", N(self.walc as f64)),
            ("health", N(self.health as f64)),
            ("absences", N(self.absences as f64)),
            ("G1", N(self.g1 as f64)),
            ("G2", N(self.g2 as f64)),
        ]
    }
}

/// Anything that can hand over the raw student table.
pub trait DatasetSource {
    fn fetch(&self) -> Result<Vec<StudentRecord>>;
}

/// Reads the table from a delimited text file.
#[derive(Debug, Clone)]
pub struct CsvSource {
    path: PathBuf,
    delimiter: Option<u8>,
}

impl CsvSource {
    /// `delimiter: None` sniffs `;` vs `,` from the header line.
    pub fn new(path: impl Into<PathBuf>, delimiter: Option<u8>) -> Self {
        CsvSource { path: path.into(), delimiter }
    }
}

impl DatasetSource for CsvSource {
    fn fetch(&self) -> Result<Vec<StudentRecord>> {
        let delimiter = match self.delimiter {
            Some(d) => d,
            None => sniff_delimiter(&self.path)?,
        };
        let recs = load_csv(&self.path, delimiter)?;
        if recs.is_empty() {
            return Err(RiskError::DataUnavailable(format!(
                "{} contains no usable student rows",
                self.path.display()
            )));
        }
        info!("loaded {} students from {}", recs.len(), self.path.display());
        Ok(recs)
    }
}

/// Picks `;` when the header line has more semicolons than commas.
fn sniff_delimiter(path: &Path) -> Result<u8> {
    let file = File::open(path).map_err(|e| unavailable(path, e))?;
    let mut first = String::new();
    BufReader::new(file)
        .read_line(&mut first)
        .map_err(|e| unavailable(path, e))?;
    let semis = first.matches(';').count();
    let commas = first.matches(',').count();
    Ok(if semis > commas { b';' } else { b',' })
}

fn unavailable(path: &Path, e: impl std::fmt::Display) -> RiskError {
    RiskError::DataUnavailable(format!("{}: {}", path.display(), e))
}

pub fn load_csv(path: &Path, delimiter: u8) -> Result<Vec<StudentRecord>> {
    let file = File::open(path).map_err(|e| unavailable(path, e))?;
    let mut rdr = ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .has_headers(true)
        .from_reader(file);

    // Own the header row, normalized so `G 3` or `G-3` still deserialize
    let headers: StringRecord = rdr.headers()?.iter().map(normalize_column).collect();
    let expected_len = headers.len();

    let mut out = Vec::new();
    for result in rdr.records() {
        let raw: StringRecord = match result {
            Ok(raw) => raw,
            Err(e) if e.is_io_error() => return Err(e.into()),
            Err(e) => {
                // bad UTF-8 in one row; the reader resyncs on the next line
                warn!("skipping unreadable record: {}", e);
                continue;
            }
        };
        let line = raw.position().map(|p| p.line()).unwrap_or(0);

        if raw.iter().all(|f| f.trim().is_empty()) {
            continue;
        }

        if raw.len() != expected_len {
            warn!(
                "skipping line {}: expected {} fields, found {}",
                line,
                expected_len,
                raw.len()
            );
            continue;
        }

        match raw.deserialize::<StudentRecord>(Some(&headers)) {
            Ok(rec) => out.push(rec),
            Err(e) => warn!("skipping malformed record at line {}: {}", line, e),
        }
    }

    Ok(out)
}

/// Load-once cache in front of a [`DatasetSource`]. Constructed by the caller and passed
/// to whoever needs the table; `invalidate` forces the next `load` to fetch again.
pub struct DatasetCache<S: DatasetSource> {
    source: S,
    records: OnceCell<Vec<StudentRecord>>,
}

impl<S: DatasetSource> DatasetCache<S> {
    pub fn new(source: S) -> Self {
        DatasetCache { source, records: OnceCell::new() }
    }

    pub fn load(&self) -> Result<&[StudentRecord]> {
        if let Some(recs) = self.records.get() {
            return Ok(recs);
        }
        let fetched = self.source.fetch()?;
        Ok(self.records.get_or_init(|| fetched))
    }

    pub fn invalidate(&mut self) {
        self.records.take();
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::cell::Cell;
    use std::error::Error;
    use std::io::Write;

    pub const HEADER: &str = "school;sex;age;address;famsize;Pstatus;Medu;Fedu;Mjob;Fjob;reason;guardian;traveltime;studytime;failures;schoolsup;famsup;paid;activities;nursery;higher;internet;romantic;famrel;freetime;goout;Dalc;Walc;health;absences;G1;G2;G3";

    /// A record with plausible defaults; tests override what they care about.
    pub fn student(school: &str, sex: &str, studytime: u8, g3: u8) -> StudentRecord {
        StudentRecord {
            school: school.into(),
            sex: sex.into(),
            age: 17,
            address: "U".into(),
            famsize: "GT3".into(),
            pstatus: "T".into(),
            medu: 2,
            fedu: 2,
            mjob: "other".into(),
            fjob: "other".into(),
            reason: "course".into(),
            guardian: "mother".into(),
            traveltime: 1,
            studytime,
            failures: 0,
            schoolsup: "no".into(),
            famsup: "yes".into(),
            paid: "no".into(),
            activities: "no".into(),
            nursery: "yes".into(),
            higher: "yes".into(),
            internet: "yes".into(),
            romantic: "no".into(),
            famrel: 4,
            freetime: 3,
            goout: 3,
            dalc: 1,
            walc: 1,
            health: 3,
            absences: 4,
            g1: g3,
            g2: g3,
            g3,
        }
    }

    #[test]
    fn labels_known_schools_only() {
        assert_eq!(school_label("GP"), Some("Gabriel Pereira"));
        assert_eq!(school_label("MS"), Some("Mousinho da Silveira"));
        assert_eq!(school_label("XX"), None);
        assert_eq!(school_code("Mousinho da Silveira"), Some("MS"));
        assert_eq!(school_code("GP"), Some("GP"));
    }

    #[test]
    fn normalizes_headers() {
        assert_eq!(normalize_column(" final grade"), "final_grade");
        assert_eq!(normalize_column("G-3"), "G_3");
    }

    #[test]
    fn loads_semicolon_file_and_skips_bad_rows() -> std::result::Result<(), Box<dyn Error>> {
        let mut f = tempfile::NamedTempFile::new()?;
        writeln!(f, "{}", HEADER)?;
        writeln!(f, "\"GP\";\"F\";18;\"U\";\"GT3\";\"A\";4;4;\"at_home\";\"teacher\";\"course\";\"mother\";2;2;0;\"yes\";\"no\";\"no\";\"no\";\"yes\";\"yes\";\"no\";\"no\";4;3;4;1;1;3;6;5;6;6")?;
        // wrong field count
        writeln!(f, "\"GP\";\"M\";17")?;
        // non-numeric age
        writeln!(f, "\"MS\";\"M\";old;\"U\";\"GT3\";\"A\";4;4;\"at_home\";\"teacher\";\"course\";\"mother\";2;2;0;\"yes\";\"no\";\"no\";\"no\";\"yes\";\"yes\";\"no\";\"no\";4;3;4;1;1;3;6;5;6;6")?;
        writeln!(f)?;
        f.flush()?;

        let recs = CsvSource::new(f.path(), None).fetch()?;
        assert_eq!(recs.len(), 1);
        let r = &recs[0];
        assert_eq!(r.school, "GP");
        assert_eq!(r.school_name(), Some("Gabriel Pereira"));
        assert_eq!(r.medu, 4);
        assert_eq!(r.absences, 6);
        assert_eq!(r.g3, 6);
        Ok(())
    }

    #[test]
    fn row_with_invalid_utf8_is_skipped() -> std::result::Result<(), Box<dyn Error>> {
        let row = |school: &str, mjob: &[u8]| -> Vec<u8> {
            let mut line = format!("\"{}\";\"F\";18;\"U\";\"GT3\";\"A\";4;4;\"", school).into_bytes();
            line.extend_from_slice(mjob);
            line.extend_from_slice(b"\";\"teacher\";\"course\";\"mother\";2;2;0;\"yes\";\"no\";\"no\";\"no\";\"yes\";\"yes\";\"no\";\"no\";4;3;4;1;1;3;6;5;6;6\n");
            line
        };
        let mut f = tempfile::NamedTempFile::new()?;
        writeln!(f, "{}", HEADER)?;
        f.write_all(&row("GP", b"at_home"))?;
        f.write_all(&row("GP", b"at_\xffhome"))?;
        f.write_all(&row("MS", b"teacher"))?;
        f.flush()?;

        let recs = CsvSource::new(f.path(), None).fetch()?;
        assert_eq!(recs.len(), 2);
        assert_eq!(recs[0].mjob, "at_home");
        assert_eq!(recs[1].school, "MS");
        Ok(())
    }

    #[test]
    fn missing_file_is_unavailable() {
        let err = CsvSource::new("/nonexistent/student-mat.csv", None).fetch().unwrap_err();
        assert!(matches!(err, RiskError::DataUnavailable(_)));
    }

    #[test]
    fn file_without_usable_rows_is_unavailable() -> std::result::Result<(), Box<dyn Error>> {
        let mut f = tempfile::NamedTempFile::new()?;
        writeln!(f, "{}", HEADER.replace(';', ","))?;
        writeln!(f, "GP,F,18")?;
        f.flush()?;
        let err = CsvSource::new(f.path(), None).fetch().unwrap_err();
        assert!(matches!(err, RiskError::DataUnavailable(_)));
        Ok(())
    }

    struct CountingSource {
        calls: Cell<usize>,
    }

    impl DatasetSource for CountingSource {
        fn fetch(&self) -> Result<Vec<StudentRecord>> {
            self.calls.set(self.calls.get() + 1);
            Ok(vec![student("GP", "F", 2, 12)])
        }
    }

    #[test]
    fn cache_fetches_once_until_invalidated() -> std::result::Result<(), Box<dyn Error>> {
        let mut cache = DatasetCache::new(CountingSource { calls: Cell::new(0) });
        assert!(cache.records.get().is_none());
        let first = cache.load()?.to_vec();
        let second = cache.load()?.to_vec();
        assert_eq!(first, second);
        assert_eq!(cache.source.calls.get(), 1);

        cache.invalidate();
        assert!(cache.records.get().is_none());
        cache.load()?;
        assert_eq!(cache.source.calls.get(), 2);
        Ok(())
    }
}
