//! Projection of a tab's component list into positioned grid items, the
//! shape a react-grid-layout style grid consumes.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::models::{ComponentPatch, Tab};
use crate::registry::ComponentRegistry;

#[derive(Clone, Serialize, Deserialize, PartialEq, Debug)]
#[serde(rename_all = "camelCase")]
pub struct GridItem {
    /// Instance id of the widget this item positions.
    pub i: String,
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_w: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_h: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_w: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_h: Option<u32>,
    #[serde(default)]
    pub is_draggable: bool,
    #[serde(default)]
    pub is_resizable: bool,
}

impl GridItem {
    /// Geometry of this item as a manager patch.
    pub fn to_patch(&self) -> ComponentPatch {
        ComponentPatch {
            x: Some(self.x),
            y: Some(self.y),
            w: Some(self.w),
            h: Some(self.h),
            props: None,
        }
    }

    pub fn set_interactive(&mut self, interactive: bool) {
        self.is_draggable = interactive;
        self.is_resizable = interactive;
    }
}

/// Derive grid items for every widget on `tab`, in list order.
pub fn derive_grid_items(tab: &Tab, registry: &ComponentRegistry) -> Vec<GridItem> {
    tab.components
        .iter()
        .map(|c| {
            let descriptor = registry.get_component(&c.component_type);
            GridItem {
                i: c.id.clone(),
                x: c.x,
                y: c.y,
                w: c.w,
                h: c.h,
                min_w: descriptor.map(|d| d.min_size.w),
                min_h: descriptor.map(|d| d.min_size.h),
                max_w: descriptor.map(|d| d.max_size.w),
                max_h: descriptor.map(|d| d.max_size.h),
                is_draggable: tab.edit_mode,
                is_resizable: tab.edit_mode,
            }
        })
        .collect()
}

/// A widget ready to mount: its type metadata plus props that are known to
/// satisfy the type's schema.
#[derive(Clone, Serialize, PartialEq, Debug)]
#[serde(rename_all = "camelCase")]
pub struct MaterializedComponent {
    pub instance_id: String,
    pub component_type: String,
    /// `None` when the type is no longer registered; hosts show a placeholder.
    pub display_name: Option<String>,
    pub props: Value,
    /// False when the stored props were rejected and defaults substituted.
    pub props_valid: bool,
}

/// Validate each widget's props at the render boundary.  Invalid props are
/// replaced with the registry defaults; the stored props are left alone.
pub fn materialize(tab: &Tab, registry: &ComponentRegistry) -> Vec<MaterializedComponent> {
    tab.components
        .iter()
        .map(|c| {
            let Some(descriptor) = registry.get_component(&c.component_type) else {
                warn!(
                    instance_id = %c.id,
                    component_type = %c.component_type,
                    "rendering placeholder for unregistered widget"
                );
                return MaterializedComponent {
                    instance_id: c.id.clone(),
                    component_type: c.component_type.clone(),
                    display_name: None,
                    props: c.props.clone(),
                    props_valid: false,
                };
            };

            let props = if c.props.is_null() { &descriptor.default_props } else { &c.props };
            match registry.validate_props(&c.component_type, props) {
                Ok(()) => MaterializedComponent {
                    instance_id: c.id.clone(),
                    component_type: c.component_type.clone(),
                    display_name: Some(descriptor.display_name.clone()),
                    props: props.clone(),
                    props_valid: true,
                },
                Err(errors) => {
                    warn!(instance_id = %c.id, ?errors, "invalid props, falling back to defaults");
                    MaterializedComponent {
                        instance_id: c.id.clone(),
                        component_type: c.component_type.clone(),
                        display_name: Some(descriptor.display_name.clone()),
                        props: descriptor.default_props.clone(),
                        props_valid: false,
                    }
                }
            }
        })
        .collect()
}
