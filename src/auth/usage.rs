//! Token usage accounting and cost calculation.
//!
//! Applies one proxied call to the caller's aggregate counters and to the
//! `model_usage` entry of the externally requested model.

use std::sync::Arc;

use rust_decimal::Decimal;
use serde_json::Value;
use tracing::info;

use super::accounts::{Accounts, PersistError};
use super::models::{ModelCatalog, ModelRoute};
use super::resolver::AuthContext;
use super::users::User;

/// Tokens consumed by one call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenDelta {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenDelta {
    /// Streamed calls are counted as a request with no tokens
    pub const REQUEST_ONLY: TokenDelta = TokenDelta {
        input_tokens: 0,
        output_tokens: 0,
    };

    pub fn total(&self) -> u64 {
        self.input_tokens.saturating_add(self.output_tokens)
    }

    /// Read `prompt_tokens`/`completion_tokens` from an OpenAI usage block
    pub fn from_openai_usage(usage: Option<&Value>) -> Self {
        let field = |name: &str| {
            usage
                .and_then(|u| u.get(name))
                .and_then(|v| v.as_u64())
                .unwrap_or(0)
        };
        Self {
            input_tokens: field("prompt_tokens"),
            output_tokens: field("completion_tokens"),
        }
    }
}

/// What one call added
#[derive(Debug, Clone)]
pub struct UsageReceipt {
    pub cost: Decimal,
    pub user: User,
}

/// Apply `delta` to a record: counters, cost, quota, per-model stats
pub fn apply_usage(user: &mut User, model: &str, delta: TokenDelta, cost: Decimal) {
    user.request_count += 1;
    user.total_input_tokens += delta.input_tokens;
    user.total_output_tokens += delta.output_tokens;
    user.total_cost += cost;

    if let Some(quota) = user.quota_left.as_mut() {
        *quota = quota.saturating_sub(delta.total());
    }

    let stats = user.model_usage.entry(model.to_string()).or_default();
    stats.request_count += 1;
    stats.input_tokens += delta.input_tokens;
    stats.output_tokens += delta.output_tokens;
    stats.cost += cost;
}

pub struct UsageAccountant {
    accounts: Arc<Accounts>,
    catalog: Arc<ModelCatalog>,
}

impl UsageAccountant {
    pub fn new(accounts: Arc<Accounts>, catalog: Arc<ModelCatalog>) -> Self {
        Self { accounts, catalog }
    }

    /// Record one completed (or started, when streaming) call.
    ///
    /// `Err` means the mirror holds the update but the store rejected it;
    /// the completion has already been served, so callers log and move on.
    pub async fn record(
        &self,
        ctx: &AuthContext,
        route: &ModelRoute,
        delta: TokenDelta,
    ) -> Result<UsageReceipt, PersistError> {
        let pricing = self.catalog.pricing(route);
        let cost = pricing.cost(delta.input_tokens, delta.output_tokens);

        let user = self
            .accounts
            .modify(&ctx.user, |u| {
                ctx.stamp_key(u);
                apply_usage(u, &route.external, delta, cost);
            })
            .await?;

        let model_stats = &user.model_usage[&route.external];
        info!(
            "User '{}' | Model '{}' (Backend: '{}') | Req# {}(M:{}) | InTok {}(+{}) | OutTok {}(+{}) | Cost ${:.10}(+${:.10}) | MCost ${:.10} | Quota {}",
            user.username,
            route.external,
            route.upstream,
            user.request_count,
            model_stats.request_count,
            user.total_input_tokens,
            delta.input_tokens,
            user.total_output_tokens,
            delta.output_tokens,
            user.total_cost,
            cost,
            model_stats.cost,
            user.quota_left
                .map(|q| q.to_string())
                .unwrap_or_else(|| "unlimited".into()),
        );

        Ok(UsageReceipt { cost, user })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::accounts::NewUser;
    use crate::auth::resolver::Authenticator;
    use crate::auth::storage::MemoryUserStore;
    use serde_json::json;

    struct Fixture {
        store: Arc<MemoryUserStore>,
        accounts: Arc<Accounts>,
        auth: Authenticator,
        accountant: UsageAccountant,
        catalog: Arc<ModelCatalog>,
        token: String,
    }

    async fn fixture(quota: Option<u64>) -> Fixture {
        let store = Arc::new(MemoryUserStore::default());
        let accounts = Arc::new(Accounts::new(store.clone(), quota));
        let catalog = Arc::new(ModelCatalog::new("provider-4/"));
        let user = accounts
            .register(NewUser {
                username: "alice".into(),
                email: "alice@x.com".into(),
                password: "secret1".into(),
                full_name: None,
            })
            .await
            .unwrap();
        Fixture {
            store,
            accounts: accounts.clone(),
            auth: Authenticator::new(accounts.clone()),
            accountant: UsageAccountant::new(accounts, catalog.clone()),
            catalog,
            token: user.access_token,
        }
    }

    fn delta(input: u64, output: u64) -> TokenDelta {
        TokenDelta {
            input_tokens: input,
            output_tokens: output,
        }
    }

    #[test]
    fn test_from_openai_usage() {
        let usage = json!({"prompt_tokens": 100, "completion_tokens": 50, "total_tokens": 150});
        assert_eq!(TokenDelta::from_openai_usage(Some(&usage)), delta(100, 50));
        assert_eq!(TokenDelta::from_openai_usage(None), TokenDelta::default());
        let partial = json!({"prompt_tokens": 7});
        assert_eq!(TokenDelta::from_openai_usage(Some(&partial)), delta(7, 0));
    }

    #[test]
    fn test_apply_usage_clamps_quota() {
        let mut user = User::new("a".into(), "a@x.com".into(), None, "h".into(), Some(100));
        apply_usage(&mut user, "gpt-4o", delta(80, 50), Decimal::ONE);
        assert_eq!(user.quota_left, Some(0));
        assert_eq!(user.request_count, 1);
        assert_eq!(user.model_usage["gpt-4o"].output_tokens, 50);
    }

    #[test]
    fn test_apply_usage_unlimited_quota_stays_unlimited() {
        let mut user = User::new("a".into(), "a@x.com".into(), None, "h".into(), None);
        apply_usage(&mut user, "gpt-4o", delta(80, 50), Decimal::ZERO);
        assert_eq!(user.quota_left, None);
    }

    #[tokio::test]
    async fn test_scenario_quota_and_model_usage() {
        let fx = fixture(Some(500_000)).await;
        let ctx = fx.auth.resolve(Some(&fx.token)).await.unwrap();
        let route = fx.catalog.route("gpt-4o-mini");

        let receipt = fx
            .accountant
            .record(&ctx, &route, delta(100, 50))
            .await
            .unwrap();
        assert_eq!(receipt.user.quota_left, Some(499_850));
        let stats = &receipt.user.model_usage["gpt-4o-mini"];
        assert_eq!(stats.request_count, 1);
        assert!(!receipt.user.model_usage.contains_key("provider-4/gpt-4o-mini"));

        let persisted = fx.store.get(&receipt.user.user_id).await.unwrap();
        assert_eq!(persisted.quota_left, Some(499_850));
    }

    #[tokio::test]
    async fn test_quota_monotonicity() {
        let fx = fixture(Some(1_000)).await;
        let route = fx.catalog.route("gpt-4o");
        let calls = [(100, 100), (300, 0), (0, 250), (400, 400), (10, 10)];

        let mut last = None;
        for (input, output) in calls {
            // Admission is checked per call; the last call is refused
            let Ok(ctx) = fx.auth.resolve(Some(&fx.token)).await else {
                break;
            };
            last = Some(
                fx.accountant
                    .record(&ctx, &route, delta(input, output))
                    .await
                    .unwrap(),
            );
        }
        let user = last.unwrap().user;
        // 1000 - (200 + 300 + 250 + 800) clamps at zero
        assert_eq!(user.quota_left, Some(0));
        assert_eq!(user.request_count, 4);
        assert!(fx.auth.resolve(Some(&fx.token)).await.is_err());
    }

    #[tokio::test]
    async fn test_cost_additivity_uses_external_name() {
        let fx = fixture(None).await;
        let calls = [("gpt-4o-mini", 100, 50), ("gpt-3.5-turbo", 1000, 10), ("gpt-4o-mini", 7, 3)];

        let mut expected = Decimal::ZERO;
        let mut user = None;
        for (model, input, output) in calls {
            let ctx = fx.auth.resolve(Some(&fx.token)).await.unwrap();
            let route = fx.catalog.route(model);
            expected += fx.catalog.pricing(&route).cost(input, output);
            user = Some(
                fx.accountant
                    .record(&ctx, &route, delta(input, output))
                    .await
                    .unwrap()
                    .user,
            );
        }
        let user = user.unwrap();
        assert_eq!(user.total_cost, expected);
        assert_eq!(
            user.model_usage["gpt-4o-mini"].cost,
            "0.000045".parse::<Decimal>().unwrap() + "0.00000285".parse::<Decimal>().unwrap()
        );
        assert_eq!(user.model_usage["gpt-4o-mini"].request_count, 2);
        assert_eq!(user.model_usage["gpt-3.5-turbo"].request_count, 1);
    }

    #[tokio::test]
    async fn test_request_only_delta() {
        let fx = fixture(Some(500_000)).await;
        let ctx = fx.auth.resolve(Some(&fx.token)).await.unwrap();
        let receipt = fx
            .accountant
            .record(&ctx, &fx.catalog.route("gpt-4o"), TokenDelta::REQUEST_ONLY)
            .await
            .unwrap();
        assert_eq!(receipt.user.request_count, 1);
        assert_eq!(receipt.user.total_input_tokens, 0);
        assert_eq!(receipt.user.quota_left, Some(500_000));
        assert_eq!(receipt.cost, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_concurrent_calls_lose_no_updates() {
        let fx = Arc::new(fixture(None).await);
        let route = fx.catalog.route("gpt-4o-mini");

        let mut handles = Vec::new();
        for _ in 0..32 {
            let fx = fx.clone();
            let route = route.clone();
            handles.push(tokio::spawn(async move {
                let ctx = fx.auth.resolve(Some(&fx.token)).await.unwrap();
                fx.accountant
                    .record(&ctx, &route, delta(10, 5))
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let ctx = fx.auth.resolve(Some(&fx.token)).await.unwrap();
        assert_eq!(ctx.user.request_count, 32);
        assert_eq!(ctx.user.total_input_tokens, 320);
        assert_eq!(ctx.user.model_usage["gpt-4o-mini"].request_count, 32);
    }

    #[tokio::test]
    async fn test_store_failure_is_reported_not_fatal() {
        let fx = fixture(Some(500_000)).await;
        let ctx = fx.auth.resolve(Some(&fx.token)).await.unwrap();
        fx.store.set_offline(true);

        let err = fx
            .accountant
            .record(&ctx, &fx.catalog.route("gpt-4o"), delta(10, 10))
            .await
            .unwrap_err();
        assert_eq!(err.user.quota_left, Some(499_980));

        // The mirror carries the update while the store is down
        let ctx = fx.auth.resolve(Some(&fx.token)).await.unwrap();
        assert_eq!(ctx.user.quota_left, Some(499_980));

        // Once the store is back, the newer mirror copy wins over the stale row
        fx.store.set_offline(false);
        let ctx = fx.auth.resolve(Some(&fx.token)).await.unwrap();
        assert_eq!(ctx.user.quota_left, Some(499_980));
    }

    #[tokio::test]
    async fn test_key_last_used_persisted_with_usage() {
        let fx = fixture(None).await;
        let ctx = fx.auth.resolve(Some(&fx.token)).await.unwrap();
        let key = fx
            .accounts
            .issue_api_key(&ctx.user, "ci".into())
            .await
            .unwrap();

        let ctx = fx.auth.resolve(Some(&key.key)).await.unwrap();
        let receipt = fx
            .accountant
            .record(&ctx, &fx.catalog.route("gpt-4o"), delta(1, 1))
            .await
            .unwrap();
        let persisted = fx.store.get(&receipt.user.user_id).await.unwrap();
        assert_eq!(persisted.api_key.unwrap().last_used, ctx.key_used_at);
    }
}
