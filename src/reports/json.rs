use super::ReportRow;
use crate::Result;
use core::fmt::Write;
use serde_json::json;

#[expect(unused_results, reason = "serde_json::Map::insert return values are not needed")]
pub fn generate<W: Write>(rows: &[ReportRow], writer: &mut W) -> Result<()> {
    let mut data = Vec::with_capacity(rows.len());

    for row in rows {
        let mut obj = serde_json::Map::new();
        obj.insert("repository".to_string(), json!(row.repository.as_str()));
        obj.insert("date".to_string(), json!(row.date.to_string()));
        obj.insert("metrics".to_string(), json!(row.metrics));
        obj.insert("sources".to_string(), json!(row.sources));
        obj.insert("finalized".to_string(), json!(row.finalized));
        obj.insert("anomaly_flags".to_string(), json!(row.anomaly_flags));
        obj.insert(
            "derived".to_string(),
            json!({
                "estimated_new_views": row.derived.estimated_new_views,
                "estimated_returning_views": row.derived.estimated_returning_views,
                "confidence": row.derived.confidence,
            }),
        );
        data.push(serde_json::Value::Object(obj));
    }

    let output = json!({ "rows": data });
    writeln!(writer, "{}", serde_json::to_string_pretty(&output)?)?;
    Ok(())
}
