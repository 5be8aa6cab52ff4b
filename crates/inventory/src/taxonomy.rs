//! Operation types and motive taxonomies for bulk adjustments.
//!
//! Each operation type fixes the movement kind (and therefore the direction)
//! and declares which motive it requires. Motives are resolved into a tagged
//! [`Motive`] at validation time.

use serde::{Deserialize, Serialize};

use crate::catalog::normalize_text;
use crate::movement::{Direction, MovementKind};

/// Which motive an operation type requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MotiveRequirement {
    None,
    AdjustmentReason,
    ShrinkageReason,
    /// Free-text supplier name.
    Supplier,
    /// Free-text customer name.
    Customer,
}

impl MotiveRequirement {
    pub fn describe(self) -> &'static str {
        match self {
            MotiveRequirement::None => "no motive",
            MotiveRequirement::AdjustmentReason => "an adjustment reason",
            MotiveRequirement::ShrinkageReason => "a shrinkage reason",
            MotiveRequirement::Supplier => "a supplier name",
            MotiveRequirement::Customer => "a customer name",
        }
    }
}

/// Resolved motive of a movement.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Motive {
    #[default]
    None,
    AdjustmentReason { key: String },
    ShrinkageReason { key: String },
    Supplier { name: String },
    Customer { name: String },
}

impl Motive {
    pub fn is_none(&self) -> bool {
        matches!(self, Motive::None)
    }
}

/// Entry in an enumerated motive taxonomy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReasonEntry {
    pub key: String,
    pub name: String,
    /// Restricts the reason to one direction (adjustment reasons carry one).
    #[serde(default)]
    pub direction: Option<Direction>,
}

impl ReasonEntry {
    pub fn new(key: &str, name: &str, direction: Option<Direction>) -> Self {
        Self {
            key: key.to_string(),
            name: name.to_string(),
            direction,
        }
    }

    fn matches(&self, text: &str) -> bool {
        let wanted = normalize_text(text);
        normalize_text(&self.key) == wanted || normalize_text(&self.name) == wanted
    }
}

/// A configured operation type (the `tipo_operacion` column).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationType {
    pub key: String,
    pub name: String,
    pub kind: MovementKind,
    pub motive: MotiveRequirement,
}

impl OperationType {
    pub fn new(key: &str, name: &str, kind: MovementKind, motive: MotiveRequirement) -> Self {
        Self {
            key: key.to_string(),
            name: name.to_string(),
            kind,
            motive,
        }
    }

    pub fn direction(&self) -> Option<Direction> {
        self.kind.direction()
    }

    fn matches(&self, text: &str) -> bool {
        let wanted = normalize_text(text);
        normalize_text(&self.key) == wanted || normalize_text(&self.name) == wanted
    }
}

/// Operation types plus the enumerated motive taxonomies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Taxonomy {
    pub operations: Vec<OperationType>,
    pub adjustment_reasons: Vec<ReasonEntry>,
    pub shrinkage_reasons: Vec<ReasonEntry>,
}

impl Default for Taxonomy {
    fn default() -> Self {
        use MotiveRequirement as M;
        Self {
            operations: vec![
                OperationType::new("entrada", "Entrada", MovementKind::Entrada, M::None),
                OperationType::new("salida", "Salida", MovementKind::Salida, M::None),
                OperationType::new(
                    "ajuste_entrada",
                    "Ajuste de entrada",
                    MovementKind::EntradaAjuste,
                    M::AdjustmentReason,
                ),
                OperationType::new(
                    "ajuste_salida",
                    "Ajuste de salida",
                    MovementKind::SalidaAjuste,
                    M::AdjustmentReason,
                ),
                OperationType::new("compra", "Compra", MovementKind::EntradaCompra, M::Supplier),
                OperationType::new("venta", "Venta", MovementKind::SalidaVenta, M::Customer),
                OperationType::new("merma", "Merma", MovementKind::Merma, M::ShrinkageReason),
            ],
            adjustment_reasons: vec![
                ReasonEntry::new("sobrante", "Sobrante de inventario", Some(Direction::Entrada)),
                ReasonEntry::new("devolucion", "Devolución de cliente", Some(Direction::Entrada)),
                ReasonEntry::new(
                    "correccion_entrada",
                    "Corrección de entrada",
                    Some(Direction::Entrada),
                ),
                ReasonEntry::new("faltante", "Faltante de inventario", Some(Direction::Salida)),
                ReasonEntry::new(
                    "correccion_salida",
                    "Corrección de salida",
                    Some(Direction::Salida),
                ),
                ReasonEntry::new("conteo_fisico", "Conteo físico", None),
            ],
            shrinkage_reasons: vec![
                ReasonEntry::new("vencimiento", "Producto vencido", None),
                ReasonEntry::new("dano", "Producto dañado", None),
                ReasonEntry::new("robo", "Robo o extravío", None),
            ],
        }
    }
}

impl Taxonomy {
    pub fn operation(&self, text: &str) -> Option<&OperationType> {
        self.operations.iter().find(|op| op.matches(text))
    }

    pub fn operation_by_key(&self, key: &str) -> Option<&OperationType> {
        self.operations.iter().find(|op| op.key == key)
    }

    /// First operation of `kind` (legacy uploads pick the adjustment
    /// operation matching the reason's direction).
    pub fn operation_for_kind(&self, kind: MovementKind) -> Option<&OperationType> {
        self.operations.iter().find(|op| op.kind == kind)
    }

    pub fn adjustment_reason(&self, text: &str) -> Option<&ReasonEntry> {
        self.adjustment_reasons.iter().find(|r| r.matches(text))
    }

    pub fn shrinkage_reason(&self, text: &str) -> Option<&ReasonEntry> {
        self.shrinkage_reasons.iter().find(|r| r.matches(text))
    }

    /// Resolve the motive text of a row against what `operation` requires.
    pub fn resolve_motive(&self, operation: &OperationType, text: Option<&str>) -> Result<Motive, String> {
        let text = text.map(str::trim).filter(|t| !t.is_empty());
        match (operation.motive, text) {
            (MotiveRequirement::None, None) => Ok(Motive::None),
            (MotiveRequirement::None, Some(t)) => Err(format!(
                "operation '{}' does not take a motive (got '{t}')",
                operation.key
            )),
            (required, None) => Err(format!(
                "operation '{}' requires {}",
                operation.key,
                required.describe()
            )),
            (MotiveRequirement::AdjustmentReason, Some(t)) => {
                let reason = self
                    .adjustment_reason(t)
                    .ok_or_else(|| format!("unknown adjustment reason '{t}'"))?;
                if let (Some(reason_dir), Some(op_dir)) = (reason.direction, operation.direction()) {
                    if reason_dir != op_dir {
                        return Err(format!(
                            "adjustment reason '{}' applies to {} movements, operation '{}' is {}",
                            reason.key,
                            reason_dir.as_str(),
                            operation.key,
                            op_dir.as_str()
                        ));
                    }
                }
                Ok(Motive::AdjustmentReason {
                    key: reason.key.clone(),
                })
            }
            (MotiveRequirement::ShrinkageReason, Some(t)) => {
                let reason = self
                    .shrinkage_reason(t)
                    .ok_or_else(|| format!("unknown shrinkage reason '{t}'"))?;
                Ok(Motive::ShrinkageReason {
                    key: reason.key.clone(),
                })
            }
            (MotiveRequirement::Supplier, Some(t)) => Ok(Motive::Supplier { name: t.to_string() }),
            (MotiveRequirement::Customer, Some(t)) => Ok(Motive::Customer { name: t.to_string() }),
        }
    }
}
