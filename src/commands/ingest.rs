use super::Host;
use super::common::{CommonArgs, Workspace, finish_run};
use crate::Result;
use crate::observations::PayloadEnvelope;
use crate::pipeline::Batch;
use camino::{Utf8Path, Utf8PathBuf};
use clap::Parser;
use ohno::IntoAppError;
use serde_json::Value;
use std::fs;

const LOG_TARGET: &str = "    ingest";

#[derive(Parser, Debug)]
pub struct IngestArgs {
    /// JSON files holding one payload envelope or an array of them
    #[arg(value_name = "PATH", required = true)]
    pub files: Vec<Utf8PathBuf>,
}

/// Merge saved payloads into the ledger without touching the network
pub async fn process_ingest<H: Host>(host: &mut H, common: &CommonArgs, args: &IngestArgs) -> Result<()> {
    let workspace = Workspace::load(common)?;

    let mut envelopes = Vec::new();
    for file in &args.files {
        envelopes.extend(read_envelopes(file)?);
    }

    log::info!(target: LOG_TARGET, "Read {} payload(s) from {} file(s)", envelopes.len(), args.files.len());

    let mut batch = Batch::open(workspace.store()).await?;
    let summary = batch.apply(&workspace.registry, &workspace.config.finalization, &envelopes);
    batch.commit()?;

    finish_run(host, &summary)
}

/// Read a file holding either one envelope or an array of envelopes.
///
/// # Errors
///
/// Returns an error if the file cannot be read or an envelope does not have the expected shape.
pub fn read_envelopes(path: &Utf8Path) -> Result<Vec<PayloadEnvelope>> {
    let text = fs::read_to_string(path).into_app_err_with(|| format!("reading payload file '{path}'"))?;
    let value: Value = serde_json::from_str(&text).into_app_err_with(|| format!("parsing payload file '{path}'"))?;

    match value {
        Value::Array(items) => items
            .into_iter()
            .enumerate()
            .map(|(index, item)| serde_json::from_value(item).into_app_err_with(|| format!("parsing envelope {} of '{path}'", index + 1)))
            .collect(),
        single => Ok(vec![serde_json::from_value(single).into_app_err_with(|| format!("parsing envelope in '{path}'"))?]),
    }
}

/// Write envelopes in the form [`read_envelopes`] accepts.
///
/// # Errors
///
/// Returns an error if the file cannot be written.
pub fn save_envelopes(path: &Utf8Path, envelopes: &[PayloadEnvelope]) -> Result<()> {
    let mut text = serde_json::to_string_pretty(envelopes)?;
    text.push('\n');
    fs::write(path, text).into_app_err_with(|| format!("writing payload file '{path}'"))?;
    Ok(())
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::observations::{CountersPayload, RawPayload};
    use crate::registry::RepoId;
    use chrono::{DateTime, Utc};

    fn envelope(repo: &str) -> PayloadEnvelope {
        PayloadEnvelope {
            repository: RepoId::parse(repo).unwrap(),
            fetched_at: DateTime::parse_from_rfc3339("2024-01-14T06:00:00Z").unwrap().with_timezone(&Utc),
            payload: RawPayload::Counters(CountersPayload {
                forks: Some(3),
                stars: Some(40),
                observed_at: None,
            }),
        }
    }

    #[test]
    #[cfg_attr(miri, ignore = "Miri cannot call GetTempPathW")]
    fn test_saved_envelopes_read_back() {
        let tmp = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::try_from(tmp.path().join("payloads.json")).unwrap();
        let envelopes = vec![envelope("octo/a"), envelope("octo/b")];

        save_envelopes(&path, &envelopes).unwrap();
        assert_eq!(read_envelopes(&path).unwrap(), envelopes);
    }

    #[test]
    #[cfg_attr(miri, ignore = "Miri cannot call GetTempPathW")]
    fn test_single_envelope_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::try_from(tmp.path().join("one.json")).unwrap();
        fs::write(&path, serde_json::to_string(&envelope("octo/a")).unwrap()).unwrap();

        let read = read_envelopes(&path).unwrap();
        assert_eq!(read.len(), 1);
        assert_eq!(read[0].repository.as_str(), "octo/a");
    }

    #[test]
    #[cfg_attr(miri, ignore = "Miri cannot call GetTempPathW")]
    fn test_bad_envelope_names_its_position() {
        let tmp = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::try_from(tmp.path().join("bad.json")).unwrap();
        let good = serde_json::to_value(envelope("octo/a")).unwrap();
        fs::write(&path, serde_json::to_string(&serde_json::json!([good, {"repository": "octo/b"}])).unwrap()).unwrap();

        let err = read_envelopes(&path).unwrap_err();
        assert!(format!("{err:#}").contains("envelope 2"), "{err:#}");
    }
}
