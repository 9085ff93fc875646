//! Purpose: In-memory capability registry backing a booted runtime.
//! Exports: `ServiceRegistry`.
//! Invariants: Lookup with multiple matches returns the earliest surviving
//! registration; callers wanting determinism pass a filter precise enough to
//! match one service.
//! Invariants: Registered instances live as long as the registry; handles
//! are never explicitly released.

use std::any::{Any, TypeId};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use crate::core::error::{Error, ErrorKind};

struct Registration {
    instance: Arc<dyn Any + Send + Sync>,
    properties: BTreeMap<String, String>,
}

#[derive(Default)]
pub struct ServiceRegistry {
    inner: RwLock<HashMap<TypeId, Vec<Registration>>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<T: Any + Send + Sync>(
        &self,
        instance: Arc<T>,
        properties: BTreeMap<String, String>,
    ) {
        self.register_raw(TypeId::of::<T>(), instance, properties);
    }

    /// Type-erased registration seam; `RuntimeHost` implementations stay
    /// object-safe by going through this.
    pub fn register_raw(
        &self,
        key: TypeId,
        instance: Arc<dyn Any + Send + Sync>,
        properties: BTreeMap<String, String>,
    ) {
        let mut map = self.inner.write().expect("registry lock poisoned");
        map.entry(key).or_default().push(Registration {
            instance,
            properties,
        });
    }

    pub fn get<T: Any + Send + Sync>(&self, filter: Option<&str>) -> Result<Arc<T>, Error> {
        let capability = std::any::type_name::<T>();
        let instance = self.lookup(TypeId::of::<T>(), capability, filter)?;
        instance.downcast::<T>().map_err(|_| {
            Error::new(ErrorKind::Internal)
                .with_message("registered instance has the wrong concrete type")
                .with_capability(capability)
        })
    }

    pub fn lookup(
        &self,
        key: TypeId,
        capability: &str,
        filter: Option<&str>,
    ) -> Result<Arc<dyn Any + Send + Sync>, Error> {
        let clauses = match filter {
            Some(filter) => parse_filter(filter)?,
            None => Vec::new(),
        };

        let map = self.inner.read().expect("registry lock poisoned");
        let registrations = map.get(&key);
        let matched = registrations.and_then(|regs| {
            regs.iter().find(|reg| {
                clauses
                    .iter()
                    .all(|(k, v)| reg.properties.get(k).is_some_and(|have| have == v))
            })
        });

        match matched {
            Some(reg) => Ok(Arc::clone(&reg.instance)),
            None => {
                let mut message = format!("service is not registered: capability='{capability}'");
                if let Some(filter) = filter {
                    message.push_str(&format!(" filter='{filter}'"));
                }
                Err(Error::new(ErrorKind::NotRegistered)
                    .with_message(message)
                    .with_capability(capability))
            }
        }
    }
}

/// Filter syntax accepted by this registry: one or more `(key=value)`
/// clauses, or a single bare `key=value`. All clauses must match the
/// registration's properties.
fn parse_filter(filter: &str) -> Result<Vec<(String, String)>, Error> {
    let malformed = || {
        Error::new(ErrorKind::InvalidFilter)
            .with_message(format!("malformed service filter '{filter}'"))
    };

    let trimmed = filter.trim();
    if trimmed.is_empty() {
        return Err(malformed());
    }

    let mut clauses = Vec::new();
    if trimmed.starts_with('(') {
        let mut rest = trimmed;
        while !rest.is_empty() {
            let Some(stripped) = rest.strip_prefix('(') else {
                return Err(malformed());
            };
            let Some(end) = stripped.find(')') else {
                return Err(malformed());
            };
            clauses.push(parse_clause(&stripped[..end]).ok_or_else(malformed)?);
            rest = &stripped[end + 1..];
        }
    } else {
        clauses.push(parse_clause(trimmed).ok_or_else(malformed)?);
    }
    Ok(clauses)
}

fn parse_clause(clause: &str) -> Option<(String, String)> {
    let (key, value) = clause.split_once('=')?;
    let key = key.trim();
    if key.is_empty() {
        return None;
    }
    Some((key.to_string(), value.trim().to_string()))
}
