use crate::domain::{Parcel, ScanRecord, WcsResponse};
use cel_interpreter::objects::{Key, Map};
use cel_interpreter::{Context, Value as CelValue};
use std::collections::HashMap;
use std::sync::Arc;

/// Everything a routing condition can look at.
#[derive(Debug, Clone, Copy)]
pub struct ConditionInput<'a> {
    pub parcel: &'a Parcel,
    pub scan: &'a ScanRecord,
    pub wcs: Option<&'a WcsResponse>,
}

impl<'a> ConditionInput<'a> {
    pub fn new(parcel: &'a Parcel, scan: &'a ScanRecord, wcs: Option<&'a WcsResponse>) -> Self {
        Self { parcel, scan, wcs }
    }
}

fn string_value(value: Option<&str>) -> CelValue {
    CelValue::String(Arc::new(value.unwrap_or_default().to_string()))
}

fn float_value(value: Option<f64>) -> CelValue {
    CelValue::Float(value.unwrap_or(0.0))
}

fn wcs_value(wcs: Option<&WcsResponse>) -> CelValue {
    let mut map: HashMap<Key, CelValue> = HashMap::new();
    if let Some(wcs) = wcs {
        map.insert(
            Key::String(Arc::new("success".to_string())),
            CelValue::Bool(wcs.success),
        );
        if let Some(chute_id) = &wcs.chute_id {
            map.insert(
                Key::String(Arc::new("chute_id".to_string())),
                CelValue::String(Arc::new(chute_id.clone())),
            );
        }
        map.insert(
            Key::String(Arc::new("code".to_string())),
            CelValue::String(Arc::new(wcs.code.clone())),
        );
    }
    CelValue::Map(Map { map: Arc::new(map) })
}

/// Build the CEL evaluation context for one parcel decision.
///
/// Scan measurements take precedence over whatever the parcel already holds;
/// missing numbers become `0.0` and missing strings become `""`.
pub fn build_condition_context(input: &ConditionInput<'_>) -> Context<'static> {
    let parcel = input.parcel;
    let scan = input.scan;

    let mut context = Context::default();
    context.add_variable_from_value("parcel_id", string_value(Some(&parcel.parcel_id)));
    context.add_variable_from_value("cart_number", string_value(parcel.cart_number.as_deref()));
    context.add_variable_from_value("barcode", string_value(Some(&scan.barcode)));
    context.add_variable_from_value("weight", float_value(scan.weight.or(parcel.weight)));
    context.add_variable_from_value("length", float_value(scan.length.or(parcel.length)));
    context.add_variable_from_value("width", float_value(scan.width.or(parcel.width)));
    context.add_variable_from_value("height", float_value(scan.height.or(parcel.height)));
    context.add_variable_from_value("volume", float_value(scan.volume.or(parcel.volume)));
    context.add_variable_from_value("wcs", wcs_value(input.wcs));
    context
}
