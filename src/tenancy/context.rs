//! Identity tree and policy resolution for multi-tenant deployments: a
//! partner/customer/app hierarchy with layered policy-id precedence
//! (request override > app > tenant > partner > system default).

use std::collections::HashMap;
use thiserror::Error;

/// Errors raised while resolving tenancy identity or policy.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TenancyError {
    /// The referenced MSSP does not exist in the registry.
    #[error("unknown mssp: {0}")]
    UnknownMssp(String),
    /// The referenced customer does not exist under its MSSP.
    #[error("unknown customer: {0}")]
    UnknownCustomer(String),
    /// The referenced app does not exist under its customer.
    #[error("unknown app: {0}")]
    UnknownApp(String),
}

/// Which level in the identity hierarchy supplied the resolved policy id
/// (§3 "the resolving level is recorded in `resolution_source`").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionSource {
    /// The caller's per-request override won.
    Request,
    /// The app-level default policy won.
    App,
    /// The customer (tenant) default policy won.
    Tenant,
    /// The MSSP (partner) default policy won.
    Mssp,
    /// No level pinned a policy; the system default applies.
    SystemDefault,
}

/// Outcome of [`TenantRegistry::resolve_policy`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyResolutionResult {
    /// The resolved policy id (or the system default id).
    pub policy_id: String,
    /// Which level supplied it.
    pub resolution_source: ResolutionSource,
}

/// An App: the unit a scan request runs under.
#[derive(Debug, Clone)]
pub struct App {
    /// App identifier, unique within its customer.
    pub app_id: String,
    /// Default policy id for scans under this app, if pinned.
    pub default_policy_id: Option<String>,
}

/// A Customer (tenant): owns zero or more [`App`]s.
#[derive(Debug, Clone)]
pub struct Customer {
    /// Customer identifier, unique within its MSSP.
    pub customer_id: String,
    /// Default policy id for this customer's scans, if pinned.
    pub default_policy_id: Option<String>,
    /// Apps owned by this customer, keyed by `app_id`.
    pub apps: HashMap<String, App>,
}

/// An MSSP (partner): owns zero or more [`Customer`]s.
#[derive(Debug, Clone)]
pub struct Mssp {
    /// MSSP identifier.
    pub mssp_id: String,
    /// Default policy id for this partner's scans, if pinned.
    pub default_policy_id: Option<String>,
    /// Customers owned by this MSSP, keyed by `customer_id`.
    pub customers: HashMap<String, Customer>,
}

const SYSTEM_DEFAULT_POLICY_ID: &str = "system-default";

/// Holds the MSSP → Customer → App identity tree and resolves which
/// policy id applies to a given scan (§4.13).
#[derive(Debug, Clone, Default)]
pub struct TenantRegistry {
    mssps: HashMap<String, Mssp>,
}

impl TenantRegistry {
    /// Construct an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an MSSP node.
    pub fn upsert_mssp(&mut self, mssp: Mssp) {
        self.mssps.insert(mssp.mssp_id.clone(), mssp);
    }

    /// Insert or replace a customer under `mssp_id`.
    ///
    /// # Errors
    ///
    /// Returns [`TenancyError::UnknownMssp`] if `mssp_id` isn't registered.
    pub fn upsert_customer(&mut self, mssp_id: &str, customer: Customer) -> Result<(), TenancyError> {
        let mssp = self.mssps.get_mut(mssp_id).ok_or_else(|| TenancyError::UnknownMssp(mssp_id.to_string()))?;
        mssp.customers.insert(customer.customer_id.clone(), customer);
        Ok(())
    }

    /// Insert or replace an app under `mssp_id`/`customer_id`.
    ///
    /// # Errors
    ///
    /// Returns [`TenancyError::UnknownMssp`] or [`TenancyError::UnknownCustomer`]
    /// if the parent isn't registered.
    pub fn upsert_app(&mut self, mssp_id: &str, customer_id: &str, app: App) -> Result<(), TenancyError> {
        let mssp = self.mssps.get_mut(mssp_id).ok_or_else(|| TenancyError::UnknownMssp(mssp_id.to_string()))?;
        let customer = mssp.customers.get_mut(customer_id).ok_or_else(|| TenancyError::UnknownCustomer(customer_id.to_string()))?;
        customer.apps.insert(app.app_id.clone(), app);
        Ok(())
    }

    /// Resolve the policy id that applies to a scan under `mssp_id`/
    /// `customer_id`/`app_id`, honoring precedence request > app > tenant >
    /// partner > system default (§3).
    ///
    /// # Errors
    ///
    /// Returns [`TenancyError::UnknownMssp`]/[`TenancyError::UnknownCustomer`]/
    /// [`TenancyError::UnknownApp`] if any named level doesn't exist.
    pub fn resolve_policy(
        &self,
        mssp_id: &str,
        customer_id: &str,
        app_id: &str,
        request_override: Option<&str>,
    ) -> Result<PolicyResolutionResult, TenancyError> {
        if let Some(policy_id) = request_override {
            return Ok(PolicyResolutionResult { policy_id: policy_id.to_string(), resolution_source: ResolutionSource::Request });
        }

        let mssp = self.mssps.get(mssp_id).ok_or_else(|| TenancyError::UnknownMssp(mssp_id.to_string()))?;
        let customer = mssp.customers.get(customer_id).ok_or_else(|| TenancyError::UnknownCustomer(customer_id.to_string()))?;
        let app = customer.apps.get(app_id).ok_or_else(|| TenancyError::UnknownApp(app_id.to_string()))?;

        if let Some(policy_id) = &app.default_policy_id {
            return Ok(PolicyResolutionResult { policy_id: policy_id.clone(), resolution_source: ResolutionSource::App });
        }
        if let Some(policy_id) = &customer.default_policy_id {
            return Ok(PolicyResolutionResult { policy_id: policy_id.clone(), resolution_source: ResolutionSource::Tenant });
        }
        if let Some(policy_id) = &mssp.default_policy_id {
            return Ok(PolicyResolutionResult { policy_id: policy_id.clone(), resolution_source: ResolutionSource::Mssp });
        }
        Ok(PolicyResolutionResult { policy_id: SYSTEM_DEFAULT_POLICY_ID.to_string(), resolution_source: ResolutionSource::SystemDefault })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry_with_app(app_policy: Option<&str>, customer_policy: Option<&str>, mssp_policy: Option<&str>) -> TenantRegistry {
        let mut registry = TenantRegistry::new();
        registry.upsert_mssp(Mssp { mssp_id: "mssp-1".to_string(), default_policy_id: mssp_policy.map(str::to_string), customers: HashMap::new() });
        registry
            .upsert_customer("mssp-1", Customer { customer_id: "cust-1".to_string(), default_policy_id: customer_policy.map(str::to_string), apps: HashMap::new() })
            .unwrap();
        registry.upsert_app("mssp-1", "cust-1", App { app_id: "app-1".to_string(), default_policy_id: app_policy.map(str::to_string) }).unwrap();
        registry
    }

    #[test]
    fn request_override_always_wins() {
        let registry = registry_with_app(Some("app-policy"), Some("tenant-policy"), Some("mssp-policy"));
        let result = registry.resolve_policy("mssp-1", "cust-1", "app-1", Some("request-policy")).unwrap();
        assert_eq!(result.policy_id, "request-policy");
        assert_eq!(result.resolution_source, ResolutionSource::Request);
    }

    #[test]
    fn app_level_wins_over_tenant_and_mssp() {
        let registry = registry_with_app(Some("app-policy"), Some("tenant-policy"), Some("mssp-policy"));
        let result = registry.resolve_policy("mssp-1", "cust-1", "app-1", None).unwrap();
        assert_eq!(result.policy_id, "app-policy");
        assert_eq!(result.resolution_source, ResolutionSource::App);
    }

    #[test]
    fn falls_back_through_tenant_to_mssp() {
        let registry = registry_with_app(None, None, Some("mssp-policy"));
        let result = registry.resolve_policy("mssp-1", "cust-1", "app-1", None).unwrap();
        assert_eq!(result.policy_id, "mssp-policy");
        assert_eq!(result.resolution_source, ResolutionSource::Mssp);
    }

    #[test]
    fn falls_back_to_system_default_when_nothing_pinned() {
        let registry = registry_with_app(None, None, None);
        let result = registry.resolve_policy("mssp-1", "cust-1", "app-1", None).unwrap();
        assert_eq!(result.policy_id, SYSTEM_DEFAULT_POLICY_ID);
        assert_eq!(result.resolution_source, ResolutionSource::SystemDefault);
    }

    #[test]
    fn unknown_app_errors() {
        let registry = registry_with_app(None, None, None);
        let err = registry.resolve_policy("mssp-1", "cust-1", "no-such-app", None).unwrap_err();
        assert_eq!(err, TenancyError::UnknownApp("no-such-app".to_string()));
    }
}
