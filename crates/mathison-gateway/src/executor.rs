// executor.rs - ExecutorGuard: token re-check at the point of execution.
//
// The gate already decided, but executors do not trust that. Before any
// side effect the executor hands its token to a guard, which checks that
// the token is present, names an action of the executor's kind, and is
// still valid, and spends one use.

use std::sync::Arc;

use mathison_token::{ActionKind, CapabilityToken, TokenEngine, TokenError, ValidateOptions};

use crate::error::GatewayError;

/// Guard for one kind of executor (model calls, tool calls, memory writes, ...).
#[derive(Debug, Clone)]
pub struct ExecutorGuard {
    tokens: Arc<TokenEngine>,
    kind: ActionKind,
}

impl ExecutorGuard {
    pub fn new(tokens: Arc<TokenEngine>, kind: ActionKind) -> Self {
        Self { tokens, kind }
    }

    pub fn kind(&self) -> ActionKind {
        self.kind
    }

    /// Authorize one execution. Returns the token with its use count
    /// incremented; that token supersedes the one presented.
    pub fn authorize(&self, token: Option<&CapabilityToken>) -> Result<CapabilityToken, GatewayError> {
        self.authorize_with(token, ValidateOptions::new())
    }

    /// As [`authorize`](Self::authorize), also requiring the token's actor.
    pub fn authorize_actor(
        &self,
        token: Option<&CapabilityToken>,
        actor: &str,
    ) -> Result<CapabilityToken, GatewayError> {
        self.authorize_with(token, ValidateOptions::new().expect_actor(actor))
    }

    fn authorize_with(
        &self,
        token: Option<&CapabilityToken>,
        opts: ValidateOptions,
    ) -> Result<CapabilityToken, GatewayError> {
        let token = token.ok_or(TokenError::TokenMissing)?;

        // Kind is checked first so a mismatched token is not spent.
        let definition = self
            .tokens
            .registry()
            .get(&token.action_id)
            .ok_or_else(|| GatewayError::UnknownAction {
                action_id: token.action_id.clone(),
            })?;
        if definition.kind != self.kind {
            tracing::warn!(
                token_id = %token.token_id,
                action_id = %token.action_id,
                expected = %self.kind,
                actual = %definition.kind,
                "token presented to wrong executor"
            );
            return Err(GatewayError::KindMismatch {
                action_id: token.action_id.clone(),
                expected: self.kind,
                actual: definition.kind,
            });
        }

        let validation = self.tokens.assert_valid(Some(token), &opts.increment())?;
        match validation.token {
            Some(spent) => {
                tracing::debug!(
                    token_id = %spent.token_id,
                    use_count = spent.use_count,
                    max_use = spent.max_use,
                    kind = %self.kind,
                    "execution authorized"
                );
                Ok(spent)
            }
            None => Err(TokenError::TokenInvalid {
                errors: validation.errors,
            }
            .into()),
        }
    }
}
