//! Component registry: the catalogue of widget types the canvas can host.
//!
//! Each entry carries its grid bounds and a JSON schema for its props.  The
//! layout manager consults the registry for placement and clamping; the
//! canvas consults it when materializing props.

use std::collections::HashMap;
use std::fmt;

use jsonschema::JSONSchema;
use serde::Serialize;
use serde_json::{json, Value};

use crate::error::LayoutError;
use crate::models::GridSize;

/// Metadata for one widget type.
#[derive(Clone, Serialize, PartialEq, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ComponentDescriptor {
    pub id: String,
    pub display_name: String,
    pub category: String,
    pub default_size: GridSize,
    pub min_size: GridSize,
    pub max_size: GridSize,
    pub props_schema: Value,
    pub default_props: Value,
}

impl ComponentDescriptor {
    pub fn new(id: &str, display_name: &str, category: &str) -> Self {
        Self {
            id: id.to_string(),
            display_name: display_name.to_string(),
            category: category.to_string(),
            default_size: GridSize::new(4, 3),
            min_size: GridSize::new(1, 1),
            max_size: GridSize::new(12, 12),
            props_schema: json!({ "type": "object" }),
            default_props: json!({}),
        }
    }

    pub fn with_sizes(mut self, default: GridSize, min: GridSize, max: GridSize) -> Self {
        self.default_size = default;
        self.min_size = min;
        self.max_size = max;
        self
    }

    pub fn with_props(mut self, schema: Value, defaults: Value) -> Self {
        self.props_schema = schema;
        self.default_props = defaults;
        self
    }

    /// Pull `size` into `[min_size, max_size]` on both axes.
    pub fn clamp_size(&self, size: GridSize) -> GridSize {
        GridSize {
            w: size.w.max(self.min_size.w).min(self.max_size.w),
            h: size.h.max(self.min_size.h).min(self.max_size.h),
        }
    }

    fn check_bounds(&self) -> Result<(), String> {
        let (min, def, max) = (self.min_size, self.default_size, self.max_size);
        if min.w == 0 || min.h == 0 {
            return Err("minimum size must be at least 1x1".into());
        }
        if min.w > max.w || min.h > max.h {
            return Err(format!(
                "min size {}x{} exceeds max size {}x{}",
                min.w, min.h, max.w, max.h
            ));
        }
        if self.clamp_size(def) != def {
            return Err(format!("default size {}x{} lies outside its bounds", def.w, def.h));
        }
        Ok(())
    }
}

/// Keyed table of [`ComponentDescriptor`]s plus their compiled props schemas.
#[derive(Default)]
pub struct ComponentRegistry {
    entries: Vec<ComponentDescriptor>,
    validators: HashMap<String, JSONSchema>,
}

impl fmt::Debug for ComponentRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.entries.iter().map(|d| &d.id)).finish()
    }
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a widget type.
    pub fn register(&mut self, descriptor: ComponentDescriptor) -> Result<(), LayoutError> {
        if descriptor.id.trim().is_empty() {
            return Err(LayoutError::Validation("component type id must not be empty".into()));
        }
        descriptor
            .check_bounds()
            .map_err(|e| LayoutError::Validation(format!("`{}`: {}", descriptor.id, e)))?;

        let validator = JSONSchema::compile(&descriptor.props_schema).map_err(|e| {
            LayoutError::Validation(format!("props schema for `{}`: {}", descriptor.id, e))
        })?;
        if let Err(errors) = validator.validate(&descriptor.default_props) {
            let first = errors.map(|e| e.to_string()).next().unwrap_or_default();
            return Err(LayoutError::Validation(format!(
                "default props for `{}` violate its schema: {}",
                descriptor.id, first
            )));
        }

        self.validators.insert(descriptor.id.clone(), validator);
        match self.entries.iter_mut().find(|d| d.id == descriptor.id) {
            Some(existing) => *existing = descriptor,
            None => self.entries.push(descriptor),
        }
        Ok(())
    }

    pub fn get_component(&self, type_id: &str) -> Option<&ComponentDescriptor> {
        self.entries.iter().find(|d| d.id == type_id)
    }

    /// All registered types in registration order.
    pub fn list_components(&self) -> &[ComponentDescriptor] {
        &self.entries
    }

    /// Check `props` against the schema declared for `type_id`.  Types without
    /// a compiled schema accept anything.
    pub fn validate_props(&self, type_id: &str, props: &Value) -> Result<(), Vec<String>> {
        match self.validators.get(type_id) {
            Some(validator) => validator
                .validate(props)
                .map_err(|errors| errors.map(|e| e.to_string()).collect()),
            None => Ok(()),
        }
    }

    /// The widget catalogue shipped with the dashboard.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        for descriptor in builtin_descriptors() {
            let id = descriptor.id.clone();
            if let Err(err) = registry.register(descriptor) {
                tracing::error!(component_type = %id, error = %err, "builtin widget rejected");
            }
        }
        registry
    }
}

fn builtin_descriptors() -> Vec<ComponentDescriptor> {
    vec![
        ComponentDescriptor::new("market-data", "Market Data", "market")
            .with_sizes(GridSize::new(4, 4), GridSize::new(2, 2), GridSize::new(12, 8))
            .with_props(
                json!({
                    "type": "object",
                    "properties": {
                        "symbols": { "type": "array", "items": { "type": "string" } },
                        "refreshMs": { "type": "integer", "minimum": 250 }
                    }
                }),
                json!({ "symbols": ["EURUSD", "GBPUSD", "USDJPY"], "refreshMs": 1000 }),
            ),
        ComponentDescriptor::new("portfolio", "Portfolio", "portfolio")
            .with_sizes(GridSize::new(6, 4), GridSize::new(3, 2), GridSize::new(12, 10))
            .with_props(
                json!({
                    "type": "object",
                    "properties": {
                        "accountId": { "type": "string" },
                        "showPnl": { "type": "boolean" }
                    }
                }),
                json!({ "accountId": "", "showPnl": true }),
            ),
        ComponentDescriptor::new("bloomberg-volatility", "Volatility Surface", "analytics")
            .with_sizes(GridSize::new(6, 5), GridSize::new(4, 3), GridSize::new(12, 10))
            .with_props(
                json!({
                    "type": "object",
                    "properties": {
                        "currencyPair": { "type": "string", "pattern": "^[A-Z]{6}$" },
                        "tenors": { "type": "array", "items": { "type": "string" } }
                    },
                    "required": ["currencyPair"]
                }),
                json!({ "currencyPair": "EURUSD", "tenors": ["1W", "1M", "3M", "6M", "1Y"] }),
            ),
        ComponentDescriptor::new("chart", "Price Chart", "analytics")
            .with_sizes(GridSize::new(4, 3), GridSize::new(2, 2), GridSize::new(8, 6))
            .with_props(
                json!({
                    "type": "object",
                    "properties": {
                        "symbol": { "type": "string", "minLength": 1 },
                        "interval": { "enum": ["1m", "5m", "15m", "1h", "1d"] }
                    }
                }),
                json!({ "symbol": "EURUSD", "interval": "15m" }),
            ),
        ComponentDescriptor::new("fx-quotes", "FX Quotes", "market")
            .with_sizes(GridSize::new(3, 4), GridSize::new(2, 2), GridSize::new(6, 8))
            .with_props(
                json!({
                    "type": "object",
                    "properties": {
                        "pairs": { "type": "array", "items": { "type": "string" } }
                    }
                }),
                json!({ "pairs": ["EURUSD", "USDJPY"] }),
            ),
        ComponentDescriptor::new("trade-blotter", "Trade Blotter", "trading")
            .with_sizes(GridSize::new(6, 4), GridSize::new(4, 2), GridSize::new(12, 8))
            .with_props(
                json!({
                    "type": "object",
                    "properties": {
                        "pageSize": { "type": "integer", "minimum": 10, "maximum": 500 }
                    }
                }),
                json!({ "pageSize": 50 }),
            ),
    ]
}
