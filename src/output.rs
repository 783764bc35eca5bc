use std::path::PathBuf;

use csv_core::WriteResult;

#[derive(clap::ValueEnum, Clone, Debug)]
pub enum Format {
    Table,
    Jsonl,
    Csv,
}

#[derive(clap::Parser, Clone, Debug)]
#[group(id = "output::Args")]
pub struct Args {
    /// Write to this file instead of the terminal.
    #[arg(long, short = 'o')]
    output: Option<PathBuf>,
    #[arg(long, short='f', value_enum, default_value_t = Format::Table)]
    format: Format,
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("could not open the specified output file at {1:?}")]
    OpenOutputFile(#[source] std::io::Error, PathBuf),
    #[error("could not write data to the output file at {1:?}")]
    WriteFile(#[source] std::io::Error, PathBuf),
    #[error("could not write data to the terminal")]
    WriteStdout(#[source] std::io::Error),
    #[error("could not serialize the record to JSON")]
    SerializeJson(#[source] serde_json::Error),
    #[error("could not format `{0}` as a CSV field")]
    SerializeCsv(String),
}

impl Args {
    pub fn to_output(self) -> Result<Output, Error> {
        let io = match &self.output {
            None => Box::new(std::io::stdout().lock()) as Box<_>,
            Some(path) => Box::new(
                std::fs::OpenOptions::new()
                    .write(true)
                    .create(true)
                    .truncate(true)
                    .open(path)
                    .map_err(|e| Error::OpenOutputFile(e, path.clone()))?,
            ) as Box<_>,
        };
        Ok(Output::new(self.output, self.format, io))
    }
}

pub struct Output {
    path: Option<PathBuf>,
    io: Box<dyn std::io::Write>,
    formatter: Formatter,
}

enum Formatter {
    Csv,
    Table { comfy: comfy_table::Table },
    Jsonl,
}

impl Output {
    fn new(path: Option<PathBuf>, format: Format, io: Box<dyn std::io::Write>) -> Self {
        let formatter = match format {
            Format::Table => {
                let mut comfy = comfy_table::Table::new();
                comfy.set_content_arrangement(comfy_table::ContentArrangement::Dynamic);
                Formatter::Table { comfy }
            }
            Format::Jsonl => Formatter::Jsonl,
            Format::Csv => Formatter::Csv,
        };
        Self { path, io, formatter }
    }

    /// Must be called before any row is written.
    pub fn table_headers(&mut self, hdrs: Vec<&'static str>) -> Result<(), Error> {
        match &mut self.formatter {
            Formatter::Csv => self.write_csv_row(&hdrs)?,
            Formatter::Table { comfy } => {
                comfy.set_header(hdrs);
            }
            Formatter::Jsonl => {}
        }
        Ok(())
    }

    fn write_csv_row<V: std::ops::Deref<Target = str>>(
        &mut self,
        values: &[V],
    ) -> Result<(), Error> {
        // Worst case every byte is a quote that needs doubling, plus the quotes and a terminator.
        let max_len = 4 + 2 * values.iter().map(|v| v.len()).max().unwrap_or(0);
        let mut output = vec![0; max_len];
        let mut writer = csv_core::Writer::new();
        let mut line = Vec::new();
        for (index, value) in values.iter().enumerate() {
            if index != 0 {
                let (WriteResult::InputEmpty, ob) = writer.delimiter(&mut output) else {
                    return Err(Error::SerializeCsv(value.to_string()));
                };
                line.extend_from_slice(&output[..ob]);
            }
            let (WriteResult::InputEmpty, ib, ob) = writer.field(value.as_bytes(), &mut output)
            else {
                return Err(Error::SerializeCsv(value.to_string()));
            };
            if ib != value.len() {
                return Err(Error::SerializeCsv(value.to_string()));
            }
            line.extend_from_slice(&output[..ob]);
        }
        let (WriteResult::InputEmpty, ob) = writer.terminator(&mut output) else {
            return Err(Error::SerializeCsv(String::new()));
        };
        line.extend_from_slice(&output[..ob]);
        self.io.write_all(&line).map_err(|e| self.write_error(e))
    }

    /// Add one row to a listing.
    pub fn result<R: serde::Serialize>(
        &mut self,
        table_row: impl FnOnce() -> Vec<String>,
        serde_record: impl FnOnce() -> R,
    ) -> Result<(), Error> {
        match &mut self.formatter {
            Formatter::Csv => {
                let values = table_row();
                self.write_csv_row(&values)?;
            }
            Formatter::Table { comfy } => {
                comfy.add_row(table_row());
            }
            Formatter::Jsonl => self.write_json_line(&serde_record())?,
        }
        Ok(())
    }

    /// Output a single record as `Field`/`Value` pairs, or as one JSON object.
    pub fn record<R: serde::Serialize>(
        &mut self,
        fields: Vec<(&'static str, String)>,
        serde_record: &R,
    ) -> Result<(), Error> {
        if let Formatter::Jsonl = self.formatter {
            return self.write_json_line(serde_record);
        }
        self.table_headers(vec!["Field", "Value"])?;
        for (field, value) in fields {
            self.result(|| vec![field.to_string(), value], || ())?;
        }
        Ok(())
    }

    fn write_json_line<R: serde::Serialize>(&mut self, record: &R) -> Result<(), Error> {
        serde_json::to_writer(&mut self.io, record).map_err(Error::SerializeJson)?;
        writeln!(self.io).map_err(|e| self.write_error(e))
    }

    fn write_error(&self, e: std::io::Error) -> Error {
        match &self.path {
            None => Error::WriteStdout(e),
            Some(p) => Error::WriteFile(e, p.into()),
        }
    }

    pub fn commit(mut self) -> Result<(), Error> {
        if let Formatter::Table { comfy } = &self.formatter {
            writeln!(self.io, "{comfy}").map_err(|e| self.write_error(e))?;
        }
        self.io.flush().map_err(|e| self.write_error(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Collects everything written into a buffer that outlives the `Output`.
    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl Captured {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    fn output(format: Format) -> (Output, Captured) {
        let captured = Captured::default();
        (Output::new(None, format, Box::new(captured.clone())), captured)
    }

    #[test]
    fn csv_quotes_fields_when_needed() {
        let (mut out, captured) = output(Format::Csv);
        out.table_headers(vec!["Name", "Description"]).unwrap();
        out.result(|| vec!["FAN_SPEED".into(), "speed, 101 to 104".into()], || ()).unwrap();
        out.commit().unwrap();
        assert_eq!(
            captured.text(),
            "Name,Description\nFAN_SPEED,\"speed, 101 to 104\"\n"
        );
    }

    #[test]
    fn record_as_json_line() {
        let (mut out, captured) = output(Format::Jsonl);
        let record = serde_json::json!({"FanSpeed": 102});
        out.record(vec![("FanSpeed", "Normal (102)".into())], &record).unwrap();
        out.commit().unwrap();
        assert_eq!(captured.text(), "{\"FanSpeed\":102}\n");
    }

    #[test]
    fn record_as_table() {
        let (mut out, captured) = output(Format::Table);
        out.record(vec![("OutdoorTemperature", "-0.5 °C".into())], &()).unwrap();
        out.commit().unwrap();
        let text = captured.text();
        assert!(text.contains("Field"), "{text}");
        assert!(text.contains("OutdoorTemperature"), "{text}");
        assert!(text.contains("-0.5 °C"), "{text}");
    }
}
