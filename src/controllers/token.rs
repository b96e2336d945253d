use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use regex::Regex;

use crate::argocd::projects::{
    self as argo, ProjectService, ProjectTokenCreateRequest, ProjectTokenDeleteRequest,
};
use crate::argocd::{ArgoClient, ServiceError};
use crate::controllers::managed::{ManagedResource, ParametersOf};
use crate::engine::compare::non_empty;
use crate::engine::{ConnectionDetails, Creation, ExternalKind, ManagedOf};
use crate::resources::tokens::*;
use crate::resources::ConnectionSecretReference;
use crate::secrets::SecretResolver;
use crate::{Error, Result};

/// Parse a Go style duration such as `720h` or `1h30m`. Negative durations and
/// anything beyond `i64::MAX` nanoseconds (about 2562047h) are rejected.
pub fn parse_duration(value: &str) -> Option<Duration> {
    static WHOLE: OnceLock<Regex> = OnceLock::new();
    static PART: OnceLock<Regex> = OnceLock::new();
    let whole = WHOLE.get_or_init(|| {
        Regex::new(r"^(?:[0-9]+(?:\.[0-9]*)?(?:ns|us|µs|ms|s|m|h))+$").unwrap()
    });
    let part = PART.get_or_init(|| {
        Regex::new(r"([0-9]+)(?:\.([0-9]*))?(ns|us|µs|ms|s|m|h)").unwrap()
    });

    if value == "0" {
        return Some(Duration::ZERO);
    }
    if !whole.is_match(value) {
        return None;
    }

    let mut nanos: u128 = 0;
    for caps in part.captures_iter(value) {
        let unit: u128 = match &caps[3] {
            "ns" => 1,
            "us" | "µs" => 1_000,
            "ms" => 1_000_000,
            "s" => 1_000_000_000,
            "m" => 60_000_000_000,
            _ => 3_600_000_000_000,
        };
        let whole_part: u128 = caps[1].parse().ok()?;
        nanos = nanos.checked_add(whole_part.checked_mul(unit)?)?;

        // digits past nanosecond precision do not matter
        let fraction = caps.get(2).map_or("", |f| f.as_str());
        let fraction = &fraction[..fraction.len().min(18)];
        if !fraction.is_empty() {
            let digits: u128 = fraction.parse().ok()?;
            nanos = nanos.checked_add(digits * unit / 10u128.pow(fraction.len() as u32))?;
        }

        if nanos > i64::MAX as u128 {
            return None;
        }
    }
    Some(Duration::from_nanos(u64::try_from(nanos).ok()?))
}

fn duration(field: &str, value: &Option<String>) -> Result<Option<i64>> {
    value
        .as_deref()
        .map(|v| {
            parse_duration(v)
                .and_then(|d| i64::try_from(d.as_secs()).ok())
                .ok_or_else(|| {
                    Error::invalid("Token", format!("{field}: invalid duration {v:?}"))
                })
        })
        .transpose()
}

/// Renewal settings in seconds
#[derive(Clone, Copy, Debug, Default, PartialEq)]
struct Lifetime {
    expires_in: Option<i64>,
    renew_after: Option<i64>,
    renew_before: Option<i64>,
}

impl Lifetime {
    fn parse(params: &TokenParameters) -> Result<Self> {
        Ok(Self {
            expires_in: duration("expiresIn", &params.expires_in)?,
            renew_after: duration("renewAfter", &params.renew_after)?,
            renew_before: duration("renewBefore", &params.renew_before)?,
        })
    }
}

/// A token is fresh until it expires or enters one of the renewal windows
pub fn is_fresh(params: &TokenParameters, token: &argo::JwtToken, now: i64) -> bool {
    let Ok(lifetime) = Lifetime::parse(params) else {
        return false;
    };
    if token.exp != 0 && now >= token.exp {
        return false;
    }
    if lifetime
        .renew_after
        .is_some_and(|after| now >= token.iat.saturating_add(after))
    {
        return false;
    }
    if let Some(before) = lifetime.renew_before {
        if token.exp != 0 && now >= token.exp.saturating_sub(before) {
            return false;
        }
    }
    true
}

pub struct TokenKind {
    service: Arc<dyn ProjectService>,
}

impl TokenKind {
    pub fn new(service: Arc<dyn ProjectService>) -> Self {
        Self { service }
    }

    /// Find a token by id on the role, falling back to the project status
    async fn find(&self, params: &TokenParameters, id: &str) -> Result<Option<argo::JwtToken>> {
        let project = self.service.get(&params.project).await?;
        let Some(role) = project.spec.roles.iter().find(|r| r.name == params.role) else {
            return Ok(None);
        };
        let by_status = project
            .status
            .jwt_tokens_by_role
            .get(&params.role)
            .map(|tokens| tokens.items.as_slice())
            .unwrap_or_default();

        Ok(role
            .jwt_tokens
            .iter()
            .chain(by_status)
            // an unissued entry must not shadow an issued one with the same id
            .find(|t| t.id == id && t.iat != 0)
            .cloned())
    }

    async fn issue(&self, params: &TokenParameters, id: &str) -> Result<ConnectionDetails> {
        let lifetime = Lifetime::parse(params)?;
        let response = self
            .service
            .create_token(&ProjectTokenCreateRequest {
                project: params.project.clone(),
                role: params.role.clone(),
                description: params.description.clone().unwrap_or_default(),
                expires_in: lifetime.expires_in.unwrap_or_default(),
                id: id.to_string(),
            })
            .await?;
        Ok(ConnectionDetails::from([(
            TOKEN_CONNECTION_KEY.to_string(),
            response.token.into_bytes(),
        )]))
    }

    async fn revoke(&self, params: &TokenParameters, token: &argo::JwtToken) -> Result<()> {
        self.service
            .delete_token(&ProjectTokenDeleteRequest {
                project: params.project.clone(),
                role: params.role.clone(),
                iat: token.iat,
                id: token.id.clone(),
            })
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ExternalKind for TokenKind {
    const KIND: &'static str = "Token";

    type Parameters = TokenParameters;
    type Observation = TokenObservation;
    type Remote = argo::JwtToken;

    async fn get(
        &self,
        resource: &ManagedOf<Self>,
        external_name: &str,
    ) -> Result<Option<argo::JwtToken>> {
        Lifetime::parse(&resource.parameters)?;
        self.find(&resource.parameters, external_name).await
    }

    fn late_initialize(&self, _params: &mut TokenParameters, _remote: &argo::JwtToken) {}

    fn observe(&self, remote: Option<&argo::JwtToken>) -> TokenObservation {
        remote.map_or_else(TokenObservation::default, |token| TokenObservation {
            id: non_empty(&token.id),
            issued_at: Some(token.iat),
            expires_at: (token.exp != 0).then_some(token.exp),
        })
    }

    fn is_up_to_date(&self, params: &TokenParameters, remote: &argo::JwtToken) -> bool {
        is_fresh(params, remote, Utc::now().timestamp())
    }

    async fn create(&self, resource: &ManagedOf<Self>) -> Result<Creation> {
        let id = resource.uid.clone().unwrap_or_else(|| resource.name.clone());
        let connection_details = self.issue(&resource.parameters, &id).await?;
        Ok(Creation {
            external_name: Some(id),
            connection_details,
        })
    }

    /// Tokens cannot be changed in place; the old one is revoked and a new one issued
    /// under the same id
    async fn update(
        &self,
        resource: &ManagedOf<Self>,
        external_name: &str,
    ) -> Result<ConnectionDetails> {
        let params = &resource.parameters;
        if let Some(token) = self.find(params, external_name).await? {
            self.revoke(params, &token).await?;
        }
        self.issue(params, external_name).await
    }

    async fn delete(&self, resource: &ManagedOf<Self>, external_name: &str) -> Result<()> {
        match self.find(&resource.parameters, external_name).await? {
            Some(token) => self.revoke(&resource.parameters, &token).await,
            None => Err(ServiceError::NotFound(external_name.to_string()).into()),
        }
    }
}

impl ManagedResource for Token {
    type Kind = TokenKind;

    const FINALIZER: &'static str = TOKEN_FINALIZER;

    fn parameters(&self) -> &ParametersOf<Self> {
        &self.spec.for_provider
    }

    fn status(&self) -> Option<&TokenStatus> {
        self.status.as_ref()
    }

    fn connection_secret(&self) -> Option<&ConnectionSecretReference> {
        self.spec.write_connection_secret_to_ref.as_ref()
    }

    fn connect(client: ArgoClient, _secrets: SecretResolver) -> TokenKind {
        TokenKind::new(Arc::new(client))
    }
}
