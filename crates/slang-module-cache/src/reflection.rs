//! Reading of the reflection JSON written by `slangc -reflection-json`.
//!
//! Only the parts needed to validate stage interfaces and describe bindings are
//! modelled; everything else in the document is ignored.

use serde::Deserialize;

use crate::{
    module::{
        BindingKind, EntryPoint, InterfaceType, InterfaceVariable, ResourceBinding, ScalarKind,
    },
    options::ShaderStage,
};

/// Root of the reflection document.
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct Reflection {
    /// Global shader parameters.
    parameters: Vec<Parameter>,
    /// Entry points.
    entry_points: Vec<ReflectedEntryPoint>,
}

/// An entry point in the reflection document.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ReflectedEntryPoint {
    /// Function name.
    name: String,
    /// Stage name.
    stage: String,
    /// Entry point parameters, the varying inputs.
    parameters: Vec<Parameter>,
    /// Return value, the varying outputs.
    result: Option<Parameter>,
}

/// A parameter, a struct field or a return value.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Parameter {
    /// Name.
    name: String,
    /// Where it is bound.
    binding: Option<Binding>,
    /// Type.
    #[serde(rename = "type")]
    ty: Option<Type>,
}

/// A binding of a parameter.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Binding {
    /// e.g. `descriptorTableSlot`, `varyingInput`, `varyingOutput`.
    kind: String,
    /// Slot index.
    index: u32,
    /// Register space / descriptor set.
    space: u32,
}

/// A reflected type.
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct Type {
    /// e.g. `scalar`, `vector`, `struct`, `constantBuffer`, `resource`, `samplerState`.
    kind: String,
    /// Scalar type name for `scalar`.
    scalar_type: Option<String>,
    /// Component count for `vector`.
    element_count: Option<u8>,
    /// Component type for `vector`.
    element_type: Option<Box<Type>>,
    /// Fields for `struct`.
    fields: Vec<Parameter>,
    /// Resource shape for `resource`, e.g. `texture2D`, `structuredBuffer`.
    base_shape: Option<String>,
}

impl Type {
    /// Converts a scalar or vector type.
    fn interface_type(&self) -> Option<InterfaceType> {
        match self.kind.as_str() {
            "scalar" => Some(InterfaceType::new(
                ScalarKind::from_reflection(self.scalar_type.as_deref()?)?,
                1,
            )),
            "vector" => {
                let element = self.element_type.as_deref()?.interface_type()?;
                Some(InterfaceType::new(element.scalar, self.element_count?))
            }
            _ => None,
        }
    }

    /// Classifies a global parameter's type.
    fn binding_kind(&self) -> BindingKind {
        match self.kind.as_str() {
            "constantBuffer" | "parameterBlock" => BindingKind::UniformBuffer,
            "samplerState" => BindingKind::Sampler,
            "resource" => match self.base_shape.as_deref() {
                Some("structuredBuffer" | "byteAddressBuffer") => BindingKind::StorageBuffer,
                Some(shape) if shape.starts_with("texture") => BindingKind::Texture,
                _ => BindingKind::Other,
            },
            _ => BindingKind::Other,
        }
    }
}

/// Builds the entry point metadata for `entry_point` out of a reflection document.
///
/// Falls back to an entry point without bindings or varyings when the document does
/// not mention it, so a missing reflection never fails an otherwise good compilation.
///
/// # Errors
///
/// Returns an error if the document is not valid JSON.
#[inline]
pub fn parse_reflection(
    json: &str,
    entry_point: &str,
    stage: ShaderStage,
) -> Result<EntryPoint, serde_json::Error> {
    let reflection: Reflection = serde_json::from_str(json)?;
    let mut entry = EntryPoint::new(entry_point, stage);

    entry.bindings = reflection
        .parameters
        .iter()
        .filter_map(|parameter| {
            let binding = parameter.binding.as_ref()?;
            (binding.kind == "descriptorTableSlot").then(|| {
                let kind = parameter
                    .ty
                    .as_ref()
                    .map_or(BindingKind::Other, Type::binding_kind);
                ResourceBinding::new(&parameter.name, binding.space, binding.index, kind)
            })
        })
        .collect();

    let Some(reflected) = reflection
        .entry_points
        .iter()
        .find(|candidate| candidate.name == entry_point)
    else {
        log::debug!("reflection does not mention entry point `{entry_point}`");
        return Ok(entry);
    };
    if let Some(reflected_stage) = ShaderStage::from_name(&reflected.stage) {
        entry.stage = reflected_stage;
    }

    for parameter in &reflected.parameters {
        collect_varyings(parameter, "varyingInput", None, &mut entry.inputs);
    }
    if let Some(result) = &reflected.result {
        collect_varyings(result, "varyingOutput", None, &mut entry.outputs);
    }
    entry.normalize();
    Ok(entry)
}

/// Flattens a varying parameter (possibly a struct) into interface variables.
///
/// Struct fields without their own binding are laid out consecutively after the
/// struct's base location.
fn collect_varyings(
    parameter: &Parameter,
    kind: &str,
    inherited_location: Option<u32>,
    out: &mut Vec<InterfaceVariable>,
) {
    let location = parameter
        .binding
        .as_ref()
        .filter(|binding| binding.kind == kind)
        .map(|binding| binding.index)
        .or(inherited_location);
    let Some(ty) = &parameter.ty else {
        return;
    };

    if ty.kind == "struct" {
        let mut next = location;
        for field in &ty.fields {
            let before = out.len();
            collect_varyings(field, kind, next, out);
            next = out
                .get(before..)
                .and_then(|added| added.iter().map(|variable| variable.location).max())
                .map(|max| max + 1)
                .or(next);
        }
    } else if let (Some(location), Some(interface)) = (location, ty.interface_type()) {
        out.push(InterfaceVariable::new(&parameter.name, location, interface));
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const VERTEX_REFLECTION: &str = r#"{
        "parameters": [
            {
                "name": "camera",
                "binding": { "kind": "descriptorTableSlot", "index": 0 },
                "type": { "kind": "constantBuffer" }
            },
            {
                "name": "albedo",
                "binding": { "kind": "descriptorTableSlot", "index": 1, "space": 1 },
                "type": { "kind": "resource", "baseShape": "texture2D" }
            }
        ],
        "entryPoints": [
            {
                "name": "vertexMain",
                "stage": "vertex",
                "parameters": [
                    {
                        "name": "input",
                        "binding": { "kind": "varyingInput", "index": 0 },
                        "type": {
                            "kind": "struct",
                            "fields": [
                                { "name": "position", "type": { "kind": "vector", "elementCount": 3, "elementType": { "kind": "scalar", "scalarType": "float32" } } },
                                { "name": "uv", "type": { "kind": "vector", "elementCount": 2, "elementType": { "kind": "scalar", "scalarType": "float32" } } }
                            ]
                        }
                    }
                ],
                "result": {
                    "binding": { "kind": "varyingOutput", "index": 0 },
                    "type": {
                        "kind": "struct",
                        "fields": [
                            { "name": "color", "binding": { "kind": "varyingOutput", "index": 0 }, "type": { "kind": "vector", "elementCount": 3, "elementType": { "kind": "scalar", "scalarType": "float32" } } },
                            { "name": "layer", "binding": { "kind": "varyingOutput", "index": 2 }, "type": { "kind": "scalar", "scalarType": "uint32" } }
                        ]
                    }
                }
            }
        ]
    }"#;

    #[test_log::test]
    fn reads_bindings_and_varyings() {
        let entry = parse_reflection(VERTEX_REFLECTION, "vertexMain", ShaderStage::Vertex).unwrap();

        assert_eq!(
            entry.bindings,
            vec![
                ResourceBinding::new("camera", 0, 0, BindingKind::UniformBuffer),
                ResourceBinding::new("albedo", 1, 1, BindingKind::Texture),
            ]
        );
        let inputs: Vec<_> = entry
            .inputs
            .iter()
            .map(|variable| (variable.name.as_str(), variable.location, variable.ty.to_string()))
            .collect();
        assert_eq!(
            inputs,
            [("position", 0, "float3".to_owned()), ("uv", 1, "float2".to_owned())]
        );
        let outputs: Vec<_> = entry
            .outputs
            .iter()
            .map(|variable| (variable.name.as_str(), variable.location))
            .collect();
        assert_eq!(outputs, [("color", 0), ("layer", 2)]);
    }

    #[test_log::test]
    fn unknown_entry_point_falls_back_to_bare_metadata() {
        let entry = parse_reflection(VERTEX_REFLECTION, "other", ShaderStage::Fragment).unwrap();
        assert_eq!(entry.stage, ShaderStage::Fragment);
        assert!(entry.inputs.is_empty());
        assert_eq!(entry.bindings.len(), 2);
    }

    #[test_log::test]
    fn invalid_json_is_an_error() {
        assert!(parse_reflection("{", "main", ShaderStage::Vertex).is_err());
    }
}
