use super::stats::EntityResult;
use serde::Serialize;
use std::io::Write;
use std::path::Path;

#[derive(Serialize)]
struct ResultRow<'a> {
    handle: String,
    type_name: &'a str,
    identity: &'a str,
    phase: String,
    pass: &'a str,
    outcome: &'static str,
    reason: &'a str,
}

impl<'a> From<&'a EntityResult> for ResultRow<'a> {
    fn from(result: &'a EntityResult) -> Self {
        Self {
            handle: result.handle.to_string(),
            type_name: &result.type_name,
            identity: &result.identity,
            phase: result.phase.to_string(),
            pass: &result.pass,
            outcome: result.outcome.label(),
            reason: result.outcome.reason().unwrap_or(""),
        }
    }
}

/// Write one CSV line per entity:
/// `handle,type_name,identity,phase,pass,outcome,reason`.
pub fn write_results<W: Write>(writer: W, results: &[EntityResult]) -> Result<(), csv::Error> {
    let mut csv = csv::Writer::from_writer(writer);
    for result in results {
        csv.serialize(ResultRow::from(result))?;
    }
    csv.flush()?;
    Ok(())
}

pub fn write_results_file(path: &Path, results: &[EntityResult]) -> Result<(), csv::Error> {
    let file = std::fs::File::create(path)?;
    write_results(file, results)?;
    log::info!("Wrote {} results to {}", results.len(), path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::{Outcome, Phase};
    use crate::model::{Guid, Handle, Placeholder};

    #[test]
    fn test_results_csv_layout() {
        let results = vec![
            EntityResult {
                handle: Handle::Resolved(Guid::new("g-1")),
                type_name: "Table".to_string(),
                identity: "db/orders".to_string(),
                phase: Phase::Primary,
                pass: "primary".to_string(),
                outcome: Outcome::Created,
            },
            EntityResult {
                handle: Handle::Placeholder(Placeholder(2)),
                type_name: "Readme".to_string(),
                identity: "db/orders/readme".to_string(),
                phase: Phase::Related,
                pass: "primary".to_string(),
                outcome: Outcome::Failed {
                    reason: "rejected, twice".to_string(),
                },
            },
        ];

        let mut buffer = Vec::new();
        write_results(&mut buffer, &results).unwrap();
        let text = String::from_utf8(buffer).unwrap();
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines[0], "handle,type_name,identity,phase,pass,outcome,reason");
        assert_eq!(lines[1], "g-1,Table,db/orders,primary,primary,created,");
        assert_eq!(
            lines[2],
            "-2,Readme,db/orders/readme,related,primary,failed,\"rejected, twice\""
        );
    }
}
