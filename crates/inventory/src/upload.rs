//! Raw adjustment rows as they arrive from an already-decoded spreadsheet.
//!
//! Two column layouts are accepted. The legacy layout names an adjustment
//! reason in `tipo_ajuste`; the operation layout names an operation type in
//! `tipo_operacion` and its motive in `tipo_motivo`.

use core::num::IntErrorKind;

use serde::{Deserialize, Deserializer, Serialize};

use crate::catalog::normalize_text;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadFormat {
    Legacy,
    Operation,
}

impl UploadFormat {
    pub const LEGACY_COLUMNS: [&'static str; 5] =
        ["producto", "cantidad_ajuste", "tipo_ajuste", "almacen", "observacion"];

    pub const OPERATION_COLUMNS: [&'static str; 6] = [
        "producto",
        "cantidad",
        "tipo_operacion",
        "tipo_motivo",
        "almacen",
        "observacion",
    ];

    pub fn columns(self) -> &'static [&'static str] {
        match self {
            UploadFormat::Legacy => &Self::LEGACY_COLUMNS,
            UploadFormat::Operation => &Self::OPERATION_COLUMNS,
        }
    }

    /// Pick the layout from a header row. `observacion` is optional in both.
    pub fn detect(headers: &[&str]) -> Result<UploadFormat, String> {
        let present: Vec<String> = headers.iter().map(|h| normalize_header(h)).collect();
        let format = if present.iter().any(|h| h == "tipo_operacion") {
            UploadFormat::Operation
        } else if present.iter().any(|h| h == "tipo_ajuste") {
            UploadFormat::Legacy
        } else {
            return Err("header has neither 'tipo_operacion' nor 'tipo_ajuste'".to_string());
        };

        let missing: Vec<&str> = format
            .columns()
            .iter()
            .copied()
            .filter(|c| *c != "observacion" && *c != "tipo_motivo")
            .filter(|c| !present.iter().any(|h| h == c))
            .collect();
        if missing.is_empty() {
            Ok(format)
        } else {
            Err(format!("missing columns: {}", missing.join(", ")))
        }
    }
}

fn normalize_header(header: &str) -> String {
    normalize_text(header).replace(' ', "_")
}

/// One decoded row of an adjustment upload, cells kept as text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawAdjustmentRow {
    /// 1-based line in the source file; defaults to the position in the upload.
    #[serde(default)]
    pub line: Option<usize>,
    #[serde(default)]
    pub producto: String,
    #[serde(alias = "cantidad_ajuste", default, deserialize_with = "cell_as_text")]
    pub cantidad: String,
    #[serde(default)]
    pub tipo_operacion: Option<String>,
    #[serde(default)]
    pub tipo_ajuste: Option<String>,
    #[serde(default)]
    pub tipo_motivo: Option<String>,
    #[serde(default)]
    pub almacen: String,
    #[serde(default)]
    pub observacion: Option<String>,
}

impl RawAdjustmentRow {
    pub fn format(&self) -> UploadFormat {
        if has_text(self.tipo_operacion.as_deref()) || !has_text(self.tipo_ajuste.as_deref()) {
            UploadFormat::Operation
        } else {
            UploadFormat::Legacy
        }
    }

    /// Parse `cantidad` as a positive integer.
    ///
    /// `"12"`, `"12.0"` and `"12,00"` are accepted. A separator followed by
    /// three digits (`"1.000"`, `"1,000"`) is refused rather than guessed,
    /// since spreadsheets use both characters for thousands grouping.
    pub fn parse_quantity(&self) -> Result<i64, String> {
        let text = self.cantidad.trim();
        if text.is_empty() {
            return Err("quantity is required".to_string());
        }
        let digits = whole_part(text)
            .ok_or_else(|| format!("quantity '{text}' must be a whole number without separators"))?;
        let value = digits.parse::<i64>().map_err(|e| match e.kind() {
            IntErrorKind::PosOverflow | IntErrorKind::NegOverflow => format!("quantity '{text}' is too large"),
            _ => format!("quantity '{text}' is not a number"),
        })?;
        if value <= 0 {
            return Err(format!("quantity must be positive (got {value})"));
        }
        Ok(value)
    }
}

/// Strip a zero fraction of one or two digits; `None` for anything else
/// after a `.` or `,`.
fn whole_part(text: &str) -> Option<&str> {
    match text.split_once(['.', ',']) {
        None => Some(text),
        Some((int, fraction)) => {
            let zero = matches!(fraction.len(), 1 | 2) && fraction.bytes().all(|b| b == b'0');
            zero.then_some(int)
        }
    }
}

fn has_text(value: Option<&str>) -> bool {
    value.is_some_and(|v| !v.trim().is_empty())
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Cell {
    Int(i64),
    Float(f64),
    Text(String),
    Empty(()),
}

fn cell_as_text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Cell::deserialize(deserializer)? {
        Cell::Int(v) => v.to_string(),
        Cell::Float(v) => v.to_string(),
        Cell::Text(v) => v,
        Cell::Empty(()) => String::new(),
    })
}
