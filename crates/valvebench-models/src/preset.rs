//! Device preset files: the JSON boundary shared with the UI layer.
//!
//! A preset carries the device's electrical limits, a serialized model,
//! and optionally the raw measurement it was fitted from plus the seed
//! triode model used for pentode fitting continuity.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use valvebench_core::MeasurementJson;

use crate::error::{Error, Result};
use crate::model::{Model, ModelKind};
use crate::pentode::{GardinerPentode, ReefmanPentode, ReefmanVariant, SimpleManualPentode};
use crate::triode::{CohenHelieTriode, KorenTriode, SimpleTriode};

/// Serialized model: family tags plus the family-specific coefficients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelJson {
    /// "triode" or "pentode".
    pub device: String,
    /// Model family name, e.g. "cohenHelie" or "gardiner".
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(flatten)]
    pub params: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DevicePreset {
    pub name: String,
    pub va_max: f64,
    pub vg1_max: f64,
    pub vg2_max: f64,
    pub ia_max: f64,
    pub pa_max: f64,
    pub model: ModelJson,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub measurement: Option<MeasurementJson>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub triode_model: Option<ModelJson>,
}

impl DevicePreset {
    pub fn from_json_str(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Instantiate an empty model of the named family.
pub fn model_for_kind(kind: ModelKind) -> Box<dyn Model> {
    match kind {
        ModelKind::SimpleTriode => Box::new(SimpleTriode::new()),
        ModelKind::KorenTriode => Box::new(KorenTriode::new()),
        ModelKind::CohenHelieTriode => Box::new(CohenHelieTriode::new()),
        ModelKind::ReefmanDerkPentode => Box::new(ReefmanPentode::new(ReefmanVariant::Derk)),
        ModelKind::ReefmanDerkEPentode => Box::new(ReefmanPentode::new(ReefmanVariant::DerkE)),
        ModelKind::GardinerPentode => Box::new(GardinerPentode::new()),
        ModelKind::SimpleManualPentode => Box::new(SimpleManualPentode::new()),
    }
}

/// Look up a model family by its serialized name.
pub fn kind_from_str(name: &str) -> Result<ModelKind> {
    match name {
        "simple" => Ok(ModelKind::SimpleTriode),
        "koren" => Ok(ModelKind::KorenTriode),
        "cohenHelie" => Ok(ModelKind::CohenHelieTriode),
        "reefmanDerk" => Ok(ModelKind::ReefmanDerkPentode),
        "reefmanDerkE" => Ok(ModelKind::ReefmanDerkEPentode),
        "gardiner" => Ok(ModelKind::GardinerPentode),
        "simpleManual" => Ok(ModelKind::SimpleManualPentode),
        other => Err(Error::UnknownModelType(other.to_string())),
    }
}

/// Rebuild a model from its serialized form. Unknown parameter keys are
/// ignored; missing ones keep the family's defaults.
pub fn model_from_json(json: &ModelJson) -> Result<Box<dyn Model>> {
    match json.device.as_str() {
        "triode" | "pentode" => {}
        other => return Err(Error::UnknownDevice(other.to_string())),
    }

    let kind = kind_from_str(&json.kind)?;
    let mut model = model_for_kind(kind);
    for id in model.json_params() {
        if let Some(&value) = json.params.get(id.json_key()) {
            model.params_mut().set(*id, value);
        }
    }
    Ok(model)
}

/// Serialize a model's family-specific parameters.
pub fn model_to_json(model: &dyn Model) -> ModelJson {
    let mut params = BTreeMap::new();
    for id in model.json_params() {
        params.insert(id.json_key().to_string(), model.params().get(*id));
    }
    ModelJson {
        device: if model.kind().is_pentode() {
            "pentode".to_string()
        } else {
            "triode".to_string()
        },
        kind: model.kind().as_str().to_string(),
        params,
    }
}
