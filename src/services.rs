//! Priced-route catalog.
//!
//! The service registry is loaded once at startup from a JSON catalog
//! (either `SERVICES_FILE` or the built-in catalog) and is immutable
//! afterwards. Every paid route the gateway fronts — its price, upstream
//! provider tag, parameter schema, and category — lives here.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// HTTP methods a priced route can use.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ServiceMethod {
    #[serde(rename = "GET")]
    Get,
    #[serde(rename = "POST")]
    Post,
}

impl ServiceMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceMethod::Get => "GET",
            ServiceMethod::Post => "POST",
        }
    }
}

/// Where a declared input parameter is read from.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamLocation {
    Query,
    Body,
}

/// One declared input parameter of a priced route.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    pub location: ParamLocation,
    #[serde(default)]
    pub required: bool,
}

/// A priced route: what it costs, where it forwards, and what it accepts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    pub id: String,
    pub display_name: String,
    pub description: String,
    /// Decimal USD price string, at most 9 fractional digits.
    pub price: String,
    pub method: ServiceMethod,
    pub path: String,
    /// Upstream provider tag, resolved through the credential pool and the
    /// provider base-URL table.
    pub provider: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_estimate: Option<String>,
    #[serde(default)]
    pub params: Vec<ParamSpec>,
    pub mime_type: String,
    pub category: String,
}

/// Error raised while loading the catalog.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("failed to read catalog: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse catalog: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("duplicate route {method} {path}")]
    DuplicateRoute { method: &'static str, path: String },
    #[error("service {id}: {message}")]
    InvalidService { id: String, message: String },
}

/// Immutable catalog of priced routes.
#[derive(Debug, Clone)]
pub struct ServiceRegistry {
    services: Vec<Service>,
    by_route: HashMap<(ServiceMethod, String), usize>,
    by_id: HashMap<String, usize>,
}

const DEFAULT_CATALOG: &str = include_str!("../services.json");

impl ServiceRegistry {
    /// Loads the catalog from `SERVICES_FILE` if set, otherwise the
    /// built-in catalog.
    pub fn from_env() -> Result<Self, CatalogError> {
        match std::env::var("SERVICES_FILE") {
            Ok(path) => {
                let raw = std::fs::read_to_string(&path)?;
                tracing::info!(path, "loading service catalog");
                Self::from_json(&raw)
            }
            Err(_) => Self::from_json(DEFAULT_CATALOG),
        }
    }

    /// Parses and validates a catalog.
    pub fn from_json(raw: &str) -> Result<Self, CatalogError> {
        let services: Vec<Service> = serde_json::from_str(raw)?;
        let mut by_route = HashMap::new();
        let mut by_id = HashMap::new();

        for (index, service) in services.iter().enumerate() {
            validate_price(service)?;
            if by_route
                .insert((service.method, service.path.clone()), index)
                .is_some()
            {
                return Err(CatalogError::DuplicateRoute {
                    method: service.method.as_str(),
                    path: service.path.clone(),
                });
            }
            if by_id.insert(service.id.clone(), index).is_some() {
                return Err(CatalogError::InvalidService {
                    id: service.id.clone(),
                    message: "duplicate service id".to_string(),
                });
            }
        }

        tracing::info!(services = services.len(), "service catalog loaded");
        Ok(Self {
            services,
            by_route,
            by_id,
        })
    }

    pub fn get(&self, id: &str) -> Option<&Service> {
        self.by_id.get(id).map(|&i| &self.services[i])
    }

    pub fn all(&self) -> &[Service] {
        &self.services
    }

    /// Matches a request to a priced route. The query string is ignored;
    /// the remaining path must match exactly.
    pub fn match_route(&self, method: ServiceMethod, path: &str) -> Option<&Service> {
        let path = path.split('?').next().unwrap_or(path);
        self.by_route
            .get(&(method, path.to_string()))
            .map(|&i| &self.services[i])
    }

    /// Distinct categories present in the catalog, sorted.
    pub fn categories(&self) -> Vec<String> {
        let mut categories: Vec<String> = self
            .services
            .iter()
            .map(|s| s.category.clone())
            .collect();
        categories.sort();
        categories.dedup();
        categories
    }
}

fn validate_price(service: &Service) -> Result<(), CatalogError> {
    let trimmed = service.price.trim_start_matches('$');
    let fraction_digits = trimmed.split_once('.').map(|(_, d)| d.len()).unwrap_or(0);
    if fraction_digits > 9 {
        return Err(CatalogError::InvalidService {
            id: service.id.clone(),
            message: format!("price {:?} has more than 9 fractional digits", service.price),
        });
    }
    if crate::price::price_to_base_units(&service.price, 18).is_err() {
        return Err(CatalogError::InvalidService {
            id: service.id.clone(),
            message: format!("price {:?} is not a decimal number", service.price),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_catalog_loads() {
        let registry = ServiceRegistry::from_json(DEFAULT_CATALOG).unwrap();
        assert!(!registry.all().is_empty());
        // Every service is matchable by its own route.
        for service in registry.all() {
            let matched = registry.match_route(service.method, &service.path).unwrap();
            assert_eq!(matched.id, service.id);
        }
    }

    #[test]
    fn test_match_ignores_query_string() {
        let registry = ServiceRegistry::from_json(DEFAULT_CATALOG).unwrap();
        let service = registry
            .match_route(ServiceMethod::Get, "/api/weather/current?q=London")
            .unwrap();
        assert_eq!(service.path, "/api/weather/current");
    }

    #[test]
    fn test_no_match_for_unknown_route() {
        let registry = ServiceRegistry::from_json(DEFAULT_CATALOG).unwrap();
        assert!(registry
            .match_route(ServiceMethod::Get, "/api/nope")
            .is_none());
        // Wrong method does not match either.
        let service = registry.all().iter().find(|s| s.method == ServiceMethod::Get);
        if let Some(s) = service {
            assert!(registry.match_route(ServiceMethod::Post, &s.path).is_none());
        }
    }

    #[test]
    fn test_duplicate_route_rejected() {
        let raw = r#"[
            {"id": "a", "displayName": "A", "description": "a", "price": "0.01",
             "method": "GET", "path": "/api/x", "provider": "p",
             "mimeType": "application/json", "category": "misc"},
            {"id": "b", "displayName": "B", "description": "b", "price": "0.01",
             "method": "GET", "path": "/api/x", "provider": "p",
             "mimeType": "application/json", "category": "misc"}
        ]"#;
        assert!(matches!(
            ServiceRegistry::from_json(raw),
            Err(CatalogError::DuplicateRoute { .. })
        ));
    }

    #[test]
    fn test_excess_fraction_digits_rejected() {
        let raw = r#"[
            {"id": "a", "displayName": "A", "description": "a",
             "price": "0.0123456789", "method": "GET", "path": "/api/x",
             "provider": "p", "mimeType": "application/json", "category": "misc"}
        ]"#;
        assert!(matches!(
            ServiceRegistry::from_json(raw),
            Err(CatalogError::InvalidService { .. })
        ));
    }

    #[test]
    fn test_get_by_id() {
        let registry = ServiceRegistry::from_json(DEFAULT_CATALOG).unwrap();
        let first = &registry.all()[0];
        assert_eq!(registry.get(&first.id).unwrap().id, first.id);
        assert!(registry.get("no-such-service").is_none());
    }
}
