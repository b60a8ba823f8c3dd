//! Service scanner: turns declarations into the immutable catalog and the
//! executable procedure registry.
//!
//! Naming follows a fixed derivation table:
//!
//! | Declaration             | Procedure name          | Leading parameter |
//! |-------------------------|-------------------------|-------------------|
//! | procedure `P`           | `P`                     |                   |
//! | property `X`            | `get_X`, `set_X`        |                   |
//! | class `C` constructor   | `C_new`                 |                   |
//! | class `C` method `M`    | `C_M`                   | `this: Class(C)`  |
//! | class `C` property `X`  | `C_get_X`, `C_set_X`    | `this: Class(C)`  |
//! | class `C` static `S`    | `C_static_S`            |                   |
//!
//! Setters take their new value as a parameter named `value`.

use std::collections::HashSet;
use std::sync::Arc;

use kestrel_core::{
    Class, Enumeration, EnumerationValue, Parameter, Procedure, Service, Services, Type, Value,
};

use super::declare::{ClassDecl, ProcedureDecl, PropertyDecl, ServiceDecl};
use super::native::Handler;
use super::registry::{ProcedureDescriptor, ProcedureRegistry};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Fatal scan-time problems. Any of these aborts startup; no partial catalog
/// is ever published.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScanError {
    #[error("service {name} is declared more than once")]
    DuplicateServiceName { name: String },
    #[error("service {service} declares procedure {procedure} more than once")]
    DuplicateProcedureName { service: String, procedure: String },
    #[error("service {service} declares class {class} more than once")]
    DuplicateClassName { service: String, class: String },
    #[error("service {service} declares enumeration {enumeration} more than once")]
    DuplicateEnumerationName { service: String, enumeration: String },
    #[error("{context} refers to unknown type {ty}")]
    UnknownType { context: String, ty: String },
    #[error("{context}: default value does not conform to {ty}")]
    InvalidDefault { context: String, ty: String },
    #[error("{procedure} has no native implementation")]
    MissingHandler { procedure: String },
}

// ---------------------------------------------------------------------------
// Catalog
// ---------------------------------------------------------------------------

/// Output of a successful scan: the public catalog and the registry built
/// from the same declarations.
#[derive(Debug, Clone)]
pub struct Catalog {
    pub services: Arc<Services>,
    pub registry: Arc<ProcedureRegistry>,
}

/// Renders a summary in the catalog's documentation form. Absent or blank
/// summaries become the empty string.
#[must_use]
pub fn render_documentation(summary: Option<&str>) -> String {
    match summary.map(str::trim) {
        Some(text) if !text.is_empty() => {
            format!("<doc>\n  <summary>\n{text}\n</summary>\n</doc>")
        }
        _ => String::new(),
    }
}

/// Scans every declaration into a catalog.
///
/// Deterministic: the same declarations always produce equal catalogs, with
/// services in declaration order and, within a service, plain procedures,
/// then properties, then each class's constructor, methods, properties and
/// static methods.
///
/// # Errors
///
/// Returns the first [`ScanError`] found.
pub fn scan(decls: &[ServiceDecl]) -> Result<Catalog, ScanError> {
    let mut seen = HashSet::new();
    for decl in decls {
        if !seen.insert(decl.name.as_str()) {
            return Err(ScanError::DuplicateServiceName {
                name: decl.name.clone(),
            });
        }
    }

    let mut services = Vec::with_capacity(decls.len());
    let mut descriptors = Vec::new();
    for decl in decls {
        let (service, mut built) = scan_service(decl)?;
        services.push(service);
        descriptors.append(&mut built);
    }
    let services = Services { services };

    for descriptor in &descriptors {
        validate_types(&services, descriptor)?;
    }

    tracing::debug!(
        services = services.services.len(),
        procedures = descriptors.len(),
        "catalog scanned"
    );

    Ok(Catalog {
        services: Arc::new(services),
        registry: Arc::new(ProcedureRegistry::from_descriptors(descriptors)),
    })
}

// ---------------------------------------------------------------------------
// Per-service scanning
// ---------------------------------------------------------------------------

struct ServiceScan<'a> {
    service: &'a str,
    names: HashSet<String>,
    procedures: Vec<Procedure>,
    descriptors: Vec<ProcedureDescriptor>,
}

impl ServiceScan<'_> {
    fn push(
        &mut self,
        name: String,
        parameters: Vec<Parameter>,
        return_type: Option<Type>,
        doc: Option<&str>,
        blocking: bool,
        handler: Option<&Handler>,
    ) -> Result<(), ScanError> {
        let qualified_name = format!("{}.{name}", self.service);
        if !self.names.insert(name.clone()) {
            return Err(ScanError::DuplicateProcedureName {
                service: self.service.to_string(),
                procedure: name,
            });
        }
        let handler = handler.cloned().ok_or_else(|| ScanError::MissingHandler {
            procedure: qualified_name.clone(),
        })?;
        let procedure = Procedure {
            name,
            parameters,
            return_type,
            documentation: render_documentation(doc),
            blocking,
        };
        self.procedures.push(procedure.clone());
        self.descriptors.push(ProcedureDescriptor {
            qualified_name,
            service: self.service.to_string(),
            procedure,
            handler,
        });
        Ok(())
    }

    fn procedure(
        &mut self,
        name: String,
        leading: Option<&Parameter>,
        decl: &ProcedureDecl,
        return_type: Option<Type>,
    ) -> Result<(), ScanError> {
        let parameters = leading
            .cloned()
            .into_iter()
            .chain(decl.parameters.iter().cloned())
            .collect();
        self.push(
            name,
            parameters,
            return_type,
            decl.doc.as_deref(),
            decl.blocking,
            decl.handler.as_ref(),
        )
    }

    fn property(
        &mut self,
        prefix: &str,
        leading: Option<&Parameter>,
        decl: &PropertyDecl,
    ) -> Result<(), ScanError> {
        let get_name = format!("{prefix}get_{}", decl.name);
        let set_name = format!("{prefix}set_{}", decl.name);
        if decl.getter.is_none() && decl.setter.is_none() {
            return Err(ScanError::MissingHandler {
                procedure: format!("{}.{get_name}", self.service),
            });
        }
        if decl.getter.is_some() {
            self.push(
                get_name,
                leading.cloned().into_iter().collect(),
                Some(decl.ty.clone()),
                decl.doc.as_deref(),
                false,
                decl.getter.as_ref(),
            )?;
        }
        if decl.setter.is_some() {
            let value = Parameter {
                name: "value".to_string(),
                ty: decl.ty.clone(),
                default_value: None,
            };
            self.push(
                set_name,
                leading.cloned().into_iter().chain([value]).collect(),
                None,
                decl.doc.as_deref(),
                false,
                decl.setter.as_ref(),
            )?;
        }
        Ok(())
    }

    fn class(&mut self, decl: &ClassDecl) -> Result<(), ScanError> {
        let class_type = Type::class(self.service, &decl.name);
        let this = Parameter {
            name: "this".to_string(),
            ty: class_type.clone(),
            default_value: None,
        };
        let prefix = format!("{}_", decl.name);

        if let Some(constructor) = &decl.constructor {
            self.procedure(
                format!("{prefix}new"),
                None,
                constructor,
                Some(class_type.clone()),
            )?;
        }
        for method in &decl.methods {
            self.procedure(
                format!("{prefix}{}", method.name),
                Some(&this),
                method,
                method.return_type.clone(),
            )?;
        }
        for property in &decl.properties {
            self.property(&prefix, Some(&this), property)?;
        }
        for method in &decl.statics {
            self.procedure(
                format!("{prefix}static_{}", method.name),
                None,
                method,
                method.return_type.clone(),
            )?;
        }
        Ok(())
    }
}

fn scan_service(decl: &ServiceDecl) -> Result<(Service, Vec<ProcedureDescriptor>), ScanError> {
    let mut class_names = HashSet::new();
    let mut classes = Vec::with_capacity(decl.classes.len());
    for class in &decl.classes {
        if !class_names.insert(class.name.as_str()) {
            return Err(ScanError::DuplicateClassName {
                service: decl.name.clone(),
                class: class.name.clone(),
            });
        }
        classes.push(Class {
            name: class.name.clone(),
            documentation: render_documentation(class.doc.as_deref()),
        });
    }

    let mut enumeration_names = HashSet::new();
    let mut enumerations = Vec::with_capacity(decl.enumerations.len());
    for enumeration in &decl.enumerations {
        if !enumeration_names.insert(enumeration.name.as_str()) {
            return Err(ScanError::DuplicateEnumerationName {
                service: decl.name.clone(),
                enumeration: enumeration.name.clone(),
            });
        }
        enumerations.push(Enumeration {
            name: enumeration.name.clone(),
            values: enumeration
                .values
                .iter()
                .map(|(name, value, doc)| EnumerationValue {
                    name: name.clone(),
                    value: *value,
                    documentation: render_documentation(doc.as_deref()),
                })
                .collect(),
            documentation: render_documentation(enumeration.doc.as_deref()),
        });
    }

    let mut scan = ServiceScan {
        service: &decl.name,
        names: HashSet::new(),
        procedures: Vec::new(),
        descriptors: Vec::new(),
    };
    for procedure in &decl.procedures {
        scan.procedure(
            procedure.name.clone(),
            None,
            procedure,
            procedure.return_type.clone(),
        )?;
    }
    for property in &decl.properties {
        scan.property("", None, property)?;
    }
    for class in &decl.classes {
        scan.class(class)?;
    }

    let service = Service {
        name: decl.name.clone(),
        procedures: scan.procedures,
        classes,
        enumerations,
        documentation: render_documentation(decl.doc.as_deref()),
    };
    Ok((service, scan.descriptors))
}

// ---------------------------------------------------------------------------
// Cross-service validation
// ---------------------------------------------------------------------------

fn validate_types(services: &Services, descriptor: &ProcedureDescriptor) -> Result<(), ScanError> {
    let procedure = &descriptor.procedure;
    let mut unknown = None;
    let mut check = |ty: &Type| {
        if unknown.is_none() && !services.resolves(ty) {
            unknown = Some(ty.to_string());
        }
    };
    for parameter in &procedure.parameters {
        parameter.ty.for_each_named(&mut check);
    }
    if let Some(return_type) = &procedure.return_type {
        return_type.for_each_named(&mut check);
    }
    if let Some(ty) = unknown {
        return Err(ScanError::UnknownType {
            context: descriptor.qualified_name.clone(),
            ty,
        });
    }

    for parameter in &procedure.parameters {
        if let Some(default) = &parameter.default_value {
            if !default_is_valid(services, default, &parameter.ty) {
                return Err(ScanError::InvalidDefault {
                    context: format!("{} parameter '{}'", descriptor.qualified_name, parameter.name),
                    ty: parameter.ty.to_string(),
                });
            }
        }
    }
    Ok(())
}

/// A default is valid when it is `Null` or conforms to the parameter type.
/// Enumeration defaults must also name a declared member.
fn default_is_valid(services: &Services, default: &Value, ty: &Type) -> bool {
    if default.is_null() {
        return true;
    }
    if !default.conforms_to(ty) {
        return false;
    }
    let target = match ty {
        Type::Optional(inner) => &**inner,
        other => other,
    };
    match (default, target) {
        (Value::Enum(value), Type::Enumeration { .. }) => services
            .enumeration_for(target)
            .is_some_and(|e| e.member(*value).is_some()),
        _ => true,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
