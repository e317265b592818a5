use std::time::Duration;

use chrono::Utc;
use log::{debug, info, warn};
use rand::Rng;
use reqwest::Client;
use serde::Deserialize;
use tokio::time::{sleep, timeout};

use crate::consts::{
    DEVICE_CODE_GRANT_TYPE, LIVE_CLIENT_ID, LIVE_DEVICE_CODE_URL, LIVE_TOKEN_URL, MINECRAFT_RELYING_PARTY,
    MSAL_CLIENT_ID, MSAL_DEVICE_CODE_URL, MSAL_TOKEN_URL, REALMS_RELYING_PARTY, XBOX_LIVE_AUTHENTICATE_URL,
    XBOX_LIVE_RELYING_PARTY, XSTS_AUTHENTICATE_URL, XSTS_USER_AGENT,
};
use crate::error::{classify, AuthError, MicrosoftErrorResponse, StepError};
use crate::identity::{Identity, Title};
use crate::token_store::{TokenCacheEntry, TokenStore};
use crate::xsts::parse_xsts_response;
use mpsdlink_log::trace_if;

/// Overall wall-clock budget for one `authenticate` call, from first device
/// code request through a usable XSTS token. Matches the window an operator
/// watching a device-code prompt can reasonably be expected to act within.
const AUTH_DEADLINE: Duration = Duration::from_secs(15 * 60);

const BACKOFF_CAP: Duration = Duration::from_secs(30);

/// Retry budget and base backoff for each strategy-table step. Exposed so
/// operators can tune how aggressively a flaky account is retried before
/// falling through to the next row.
#[derive(Debug, Clone, Copy)]
pub struct AuthTuning {
    pub max_retries: u32,
    pub retry_delay: Duration,
}

impl Default for AuthTuning {
    fn default() -> Self {
        Self {
            max_retries: 5,
            retry_delay: Duration::from_secs(2),
        }
    }
}

/// The two device-code registrations this pipeline knows how to drive. Some
/// accounts are rejected by one tenant and accepted by the other, so both
/// are tried in order rather than picking one up front.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AuthFlow {
    Live,
    Msal,
}

impl AuthFlow {
    fn client_id(self) -> (&'static str, &'static str) {
        match self {
            AuthFlow::Live => LIVE_CLIENT_ID,
            AuthFlow::Msal => MSAL_CLIENT_ID,
        }
    }

    fn token_url(self) -> &'static str {
        match self {
            AuthFlow::Live => LIVE_TOKEN_URL,
            AuthFlow::Msal => MSAL_TOKEN_URL,
        }
    }
}

/// One row of the (flow, relying party, scope) strategy table: a concrete
/// combination of device-code registration and XSTS audience to attempt.
#[derive(Debug, Clone, Copy)]
struct StrategyRow {
    flow: AuthFlow,
    relying_party: &'static str,
    scope: &'static str,
}

const DEVICE_SCOPE: &str = "XboxLive.signin offline_access";

/// At least four rows, covering the three relying parties a session-hosting
/// identity actually needs a token for: Xbox Live itself (session directory
/// and social graph calls), the Minecraft Realms endpoint, and the Minecraft
/// multiplayer endpoint. Rows sharing a flow are tried against one
/// device-code/token exchange so the operator isn't re-prompted per row; the
/// first row whose XSTS exchange succeeds wins.
const STRATEGY_TABLE: &[StrategyRow] = &[
    StrategyRow {
        flow: AuthFlow::Live,
        relying_party: XBOX_LIVE_RELYING_PARTY,
        scope: DEVICE_SCOPE,
    },
    StrategyRow {
        flow: AuthFlow::Live,
        relying_party: REALMS_RELYING_PARTY,
        scope: DEVICE_SCOPE,
    },
    StrategyRow {
        flow: AuthFlow::Live,
        relying_party: MINECRAFT_RELYING_PARTY,
        scope: DEVICE_SCOPE,
    },
    StrategyRow {
        flow: AuthFlow::Msal,
        relying_party: XBOX_LIVE_RELYING_PARTY,
        scope: DEVICE_SCOPE,
    },
];

/// Distinct flows in the strategy table, in first-appearance order.
fn strategy_flows() -> Vec<AuthFlow> {
    let mut flows = Vec::new();
    for row in STRATEGY_TABLE {
        if !flows.contains(&row.flow) {
            flows.push(row.flow);
        }
    }
    flows
}

/// Relying parties paired with `flow` in the strategy table, in table order.
fn relying_parties_for(flow: AuthFlow) -> Vec<&'static str> {
    STRATEGY_TABLE.iter().filter(|row| row.flow == flow).map(|row| row.relying_party).collect()
}

/// The scope shared by every row for `flow` (all rows for one flow use the
/// same scope in this table, but the lookup stays row-driven so a future
/// per-row scope doesn't require touching call sites).
fn scope_for(flow: AuthFlow) -> &'static str {
    STRATEGY_TABLE
        .iter()
        .find(|row| row.flow == flow)
        .map(|row| row.scope)
        .unwrap_or(DEVICE_SCOPE)
}

/// Every relying party named anywhere in the table, deduplicated in
/// first-appearance order. Used by the cached-refresh path, which has no
/// flow of its own to key off since no device code is involved.
fn all_relying_parties_in_order() -> Vec<&'static str> {
    let mut seen = Vec::new();
    for row in STRATEGY_TABLE {
        if !seen.contains(&row.relying_party) {
            seen.push(row.relying_party);
        }
    }
    seen
}

#[derive(Debug, Deserialize)]
struct DeviceCodeResponse {
    device_code: String,
    user_code: String,
    verification_uri: String,
    expires_in: u64,
    interval: u64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct MsaTokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    expires_in: i64,
}

#[derive(Debug, Deserialize)]
struct XboxUserTokenResponse {
    #[serde(rename = "Token")]
    token: String,
}

/// Drives the full Microsoft device-code → XASU → XSTS chain and hands back
/// a capability-bearing [`Identity`]. Holds no per-identity state itself;
/// all persistence goes through the shared [`TokenStore`].
pub struct AuthPipeline {
    client: Client,
    token_store: TokenStore,
    tuning: AuthTuning,
}

impl AuthPipeline {
    pub fn new(token_store: TokenStore, tuning: AuthTuning) -> Self {
        Self {
            client: Client::new(),
            token_store,
            tuning,
        }
    }

    /// Authenticates `email`, first attempting a silent refresh from the
    /// token cache and only falling back to an interactive device-code
    /// prompt (via `presenter`) when no cached token chain is usable.
    pub async fn authenticate(
        &self,
        email: &str,
        title: Title,
        presenter: &dyn crate::presenter::UserCodePresenter,
    ) -> Result<Identity, AuthError> {
        let key = self.token_store.key_for(email, title);

        match timeout(AUTH_DEADLINE, self.authenticate_inner(email, title, &key, presenter)).await {
            Ok(result) => result,
            Err(_) => Err(AuthError::DeadlineExceeded),
        }
    }

    async fn authenticate_inner(
        &self,
        email: &str,
        title: Title,
        key: &str,
        presenter: &dyn crate::presenter::UserCodePresenter,
    ) -> Result<Identity, AuthError> {
        if let Some(cached) = self.token_store.load(key) {
            if cached.has_usable_xsts() {
                info!("silent refresh: cached XSTS token for {} still valid", email);
                return Ok(self.identity_from_cache(email, title, &cached));
            }

            if let Some(refresh_token) = cached.msa_refresh_token.clone() {
                match self.refresh_with_cached_token(email, title, key, &refresh_token).await {
                    Ok(identity) => return Ok(identity),
                    Err(e) => {
                        warn!("cached refresh token for {} failed ({}), invalidating cache", email, e);
                        self.token_store.invalidate(key);
                    }
                }
            }
        }

        for flow in strategy_flows() {
            let relying_parties = relying_parties_for(flow);
            let scope = scope_for(flow);
            match self
                .run_device_code_flow(email, title, key, flow, scope, &relying_parties, presenter)
                .await
            {
                Ok(identity) => return Ok(identity),
                Err(e) if e.is_permanent() => return Err(e),
                Err(e) => {
                    warn!("{:?} flow failed for {}: {}", flow, email, e);
                    continue;
                }
            }
        }

        Err(AuthError::Transient(format!(
            "exhausted every strategy-table row for {}",
            email
        )))
    }

    fn identity_from_cache(&self, email: &str, title: Title, cached: &TokenCacheEntry) -> Identity {
        Identity::new(
            email.to_string(),
            cached.xuid.clone().unwrap_or_default(),
            cached.user_hash.clone().unwrap_or_default(),
            cached.xsts_token.clone().unwrap_or_default(),
            "cache",
            cached.xsts_expiry.unwrap_or_else(Utc::now),
            title,
            false,
        )
    }

    async fn refresh_with_cached_token(
        &self,
        email: &str,
        title: Title,
        key: &str,
        refresh_token: &str,
    ) -> Result<Identity, AuthError> {
        let token = self
            .retry_step(&format!("msa refresh for {}", email), || {
                self.redeem_refresh_token(AuthFlow::Live, refresh_token)
            })
            .await
            .map_err(classify)?;

        let relying_parties = all_relying_parties_in_order();
        let xsts = self
            .retry_step(&format!("xbox chain for {}", email), || {
                self.xbox_live_chain(&token.access_token, &relying_parties)
            })
            .await
            .map_err(classify)?;

        let identity = Identity::new(
            email.to_string(),
            xsts.xuid.clone(),
            xsts.user_hash.clone(),
            xsts.token.clone(),
            "refresh_token",
            xsts.not_after,
            title,
            xsts.derived,
        );

        self.persist(key, email, title, &token, &xsts);
        Ok(identity)
    }

    async fn run_device_code_flow(
        &self,
        email: &str,
        title: Title,
        key: &str,
        flow: AuthFlow,
        scope: &str,
        relying_parties: &[&'static str],
        presenter: &dyn crate::presenter::UserCodePresenter,
    ) -> Result<Identity, AuthError> {
        let device_code_resp = self
            .retry_step(&format!("{:?} device code request", flow), || {
                self.request_device_code(flow, scope)
            })
            .await
            .map_err(classify)?;

        presenter
            .present(&crate::presenter::DeviceCodePrompt {
                verification_uri: device_code_resp.verification_uri.clone(),
                user_code: device_code_resp.user_code.clone(),
                message: device_code_resp.message.clone(),
                expires_in_seconds: device_code_resp.expires_in,
            })
            .await;

        let token = self.poll_for_token(flow, &device_code_resp).await.map_err(classify)?;

        let xsts = self
            .retry_step(&format!("xbox chain for {}", email), || {
                self.xbox_live_chain(&token.access_token, relying_parties)
            })
            .await
            .map_err(classify)?;

        let identity = Identity::new(
            email.to_string(),
            xsts.xuid.clone(),
            xsts.user_hash.clone(),
            xsts.token.clone(),
            format!("device_code:{:?}", flow),
            xsts.not_after,
            title,
            xsts.derived,
        );

        self.persist(key, email, title, &token, &xsts);
        Ok(identity)
    }

    async fn request_device_code(&self, flow: AuthFlow, scope: &str) -> Result<DeviceCodeResponse, StepError> {
        let (id_key, id_val) = flow.client_id();
        let params = [(id_key, id_val), DEVICE_CODE_GRANT_TYPE, ("scope", scope)];
        let url = match flow {
            AuthFlow::Live => LIVE_DEVICE_CODE_URL,
            AuthFlow::Msal => MSAL_DEVICE_CODE_URL,
        };
        let resp = self.client.post(url).form(&params).send().await?;
        let status = resp.status();
        let body = resp.text().await?;
        trace_if!("AUTH", "{:?} device code response ({}): {}", flow, status, body);
        if !status.is_success() {
            return Err(parse_microsoft_error(status, &body));
        }
        serde_json::from_str(&body).map_err(|e| StepError::Json(e.to_string()))
    }

    async fn poll_for_token(&self, flow: AuthFlow, device: &DeviceCodeResponse) -> Result<MsaTokenResponse, StepError> {
        let interval = Duration::from_secs(device.interval.max(1));
        let deadline = Duration::from_secs(device.expires_in);
        let start = tokio::time::Instant::now();

        loop {
            sleep(interval).await;
            if start.elapsed() > deadline {
                return Err(StepError::Microsoft {
                    error: "expired_token".into(),
                    description: "device code expired before user completed sign-in".into(),
                });
            }

            let (id_key, id_val) = flow.client_id();
            let params = [
                (id_key, id_val),
                ("grant_type", "urn:ietf:params:oauth:grant-type:device_code"),
                ("device_code", device.device_code.as_str()),
            ];
            let resp = self.client.post(flow.token_url()).form(&params).send().await?;
            let status = resp.status();
            let body = resp.text().await?;

            if status.is_success() {
                return serde_json::from_str(&body).map_err(|e| StepError::Json(e.to_string()));
            }

            let parsed: Result<MicrosoftErrorResponse, _> = serde_json::from_str(&body);
            match parsed {
                Ok(err) if err.error == "authorization_pending" => {
                    debug!("device code still pending");
                    continue;
                }
                Ok(err) if err.error == "slow_down" => {
                    sleep(Duration::from_secs(5)).await;
                    continue;
                }
                Ok(err) => {
                    return Err(StepError::Microsoft {
                        error: err.error,
                        description: err.error_description,
                    })
                }
                Err(_) => return Err(StepError::HttpStatus(status, body)),
            }
        }
    }

    async fn redeem_refresh_token(&self, flow: AuthFlow, refresh_token: &str) -> Result<MsaTokenResponse, StepError> {
        let (id_key, id_val) = flow.client_id();
        let params = [
            (id_key, id_val),
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("scope", DEVICE_SCOPE),
        ];
        let resp = self.client.post(flow.token_url()).form(&params).send().await?;
        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(parse_microsoft_error(status, &body));
        }
        serde_json::from_str(&body).map_err(|e| StepError::Json(e.to_string()))
    }

    /// XASU (user token) followed by an XSTS authorization attempt against
    /// each relying party in turn, in the order given — the first row to
    /// yield a valid token wins. Returns the last row's error if every
    /// relying party is rejected.
    async fn xbox_live_chain(
        &self,
        msa_access_token: &str,
        relying_parties: &[&'static str],
    ) -> Result<crate::xsts::XstsTokenInfo, StepError> {
        let user_token = self.request_xbox_user_token(msa_access_token).await?;

        let mut last_err = None;
        for relying_party in relying_parties {
            match self.request_xsts(&user_token, relying_party).await {
                Ok(info) => return Ok(info),
                Err(e) => {
                    debug!("relying party {} rejected the XSTS exchange: {}", relying_party, e);
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or(StepError::MissingUserHash))
    }

    async fn request_xbox_user_token(&self, msa_access_token: &str) -> Result<String, StepError> {
        let body = serde_json::json!({
            "Properties": {
                "AuthMethod": "RPS",
                "SiteName": "user.auth.xboxlive.com",
                "RpsTicket": format!("d={}", msa_access_token),
            },
            "RelyingParty": "http://auth.xboxlive.com",
            "TokenType": "JWT",
        });

        let resp = self
            .client
            .post(XBOX_LIVE_AUTHENTICATE_URL)
            .header("x-xbl-contract-version", "1")
            .json(&body)
            .send()
            .await?;
        let status = resp.status();
        let text = resp.text().await?;
        if !status.is_success() {
            return Err(StepError::HttpStatus(status, text));
        }
        let parsed: XboxUserTokenResponse =
            serde_json::from_str(&text).map_err(|e| StepError::Json(e.to_string()))?;
        Ok(parsed.token)
    }

    async fn request_xsts(&self, user_token: &str, relying_party: &str) -> Result<crate::xsts::XstsTokenInfo, StepError> {
        let body = serde_json::json!({
            "Properties": {
                "SandboxId": "RETAIL",
                "UserTokens": [user_token],
            },
            "RelyingParty": relying_party,
            "TokenType": "JWT",
        });

        let resp = self
            .client
            .post(XSTS_AUTHENTICATE_URL)
            .header("x-xbl-contract-version", "1")
            .header("User-Agent", XSTS_USER_AGENT)
            .json(&body)
            .send()
            .await?;
        let status = resp.status();
        let text = resp.text().await?;
        let info = parse_xsts_response(status, &text)?;
        if info.user_hash.is_empty() {
            return Err(StepError::MissingUserHash);
        }
        Ok(info)
    }

    /// Runs `step` up to `self.tuning.max_retries` times with jittered
    /// exponential backoff off of `self.tuning.retry_delay`, stopping
    /// immediately on a permanent-looking Microsoft/Xbox error so a bad
    /// credential doesn't burn the whole attempt budget before the caller
    /// gives up.
    async fn retry_step<T, F, Fut>(&self, label: &str, mut step: F) -> Result<T, StepError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, StepError>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match step().await {
                Ok(v) => return Ok(v),
                Err(e) if attempt >= self.tuning.max_retries => return Err(e),
                Err(e) if is_non_retryable(&e) => return Err(e),
                Err(e) => {
                    let backoff = jittered_backoff(self.tuning.retry_delay, attempt);
                    warn!(
                        "{} attempt {}/{} failed ({}), retrying in {:?}",
                        label, attempt, self.tuning.max_retries, e, backoff
                    );
                    sleep(backoff).await;
                }
            }
        }
    }

    fn persist(&self, key: &str, email: &str, title: Title, token: &MsaTokenResponse, xsts: &crate::xsts::XstsTokenInfo) {
        let entry = TokenCacheEntry {
            email: email.to_string(),
            title: Some(title),
            msa_refresh_token: token.refresh_token.clone(),
            msa_access_token: Some(token.access_token.clone()),
            msa_access_expiry: Some(Utc::now() + chrono::Duration::seconds(token.expires_in)),
            xbl_token: None,
            xbl_expiry: None,
            device_token: None,
            device_expiry: None,
            title_token: None,
            title_expiry: None,
            xsts_token: Some(xsts.token.clone()),
            xsts_expiry: Some(xsts.not_after),
            user_hash: Some(xsts.user_hash.clone()),
            xuid: Some(xsts.xuid.clone()),
            saved_at: None,
        };
        if let Err(e) = self.token_store.save(key, &entry) {
            warn!("failed to persist token cache for {}: {}", email, e);
        }
    }
}

fn is_non_retryable(e: &StepError) -> bool {
    match e {
        StepError::Microsoft { error, .. } => error == "invalid_grant" || error == "unauthorized_client",
        StepError::Xbox { xerr, .. } => crate::consts::is_permanent_xerr(xerr),
        _ => false,
    }
}

fn parse_microsoft_error(status: reqwest::StatusCode, body: &str) -> StepError {
    match serde_json::from_str::<MicrosoftErrorResponse>(body) {
        Ok(err) => StepError::Microsoft {
            error: err.error,
            description: err.error_description,
        },
        Err(_) => StepError::HttpStatus(status, body.to_string()),
    }
}

/// Exponential backoff with full jitter: `base * 2^(attempt-1)`, capped,
/// then scaled by a uniform random factor in `[0.5, 1.0]` so a fleet of
/// identities retrying the same failure don't all hammer the endpoint on
/// the same tick. No floor invariant applies here (unlike session reconnect
/// backoff), so scaling below the exponential value is fine.
fn jittered_backoff(base: Duration, attempt: u32) -> Duration {
    let exp = base.as_secs_f64() * 2f64.powi(attempt as i32 - 1);
    let capped = exp.min(BACKOFF_CAP.as_secs_f64());
    let jitter = rand::thread_rng().gen_range(0.5..=1.0);
    Duration::from_secs_f64(capped * jitter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_stays_within_cap_and_grows() {
        let base = AuthTuning::default().retry_delay;
        let first = jittered_backoff(base, 1);
        let last = jittered_backoff(base, AuthTuning::default().max_retries);
        assert!(first <= BACKOFF_CAP);
        assert!(last <= BACKOFF_CAP);
        assert!(first.as_secs_f64() <= last.as_secs_f64() + 0.001);
    }

    #[test]
    fn non_retryable_matches_permanent_xerrs_only() {
        assert!(is_non_retryable(&StepError::Xbox {
            xerr: "2148916233".into(),
            message: "".into()
        }));
        assert!(!is_non_retryable(&StepError::Xbox {
            xerr: "2148916235".into(),
            message: "".into()
        }));
        assert!(is_non_retryable(&StepError::Microsoft {
            error: "invalid_grant".into(),
            description: "".into()
        }));
        assert!(!is_non_retryable(&StepError::Microsoft {
            error: "authorization_pending".into(),
            description: "".into()
        }));
    }
}
