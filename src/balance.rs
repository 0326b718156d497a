//! Concurrent balance queries for a set of roles

use crate::address::NativeAddress;
use crate::chain::ChainClient;
use crate::store::{Role, RoleStore};
use crate::{Error, Result};
use alloy::primitives::U256;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::task::JoinSet;

/// attoFIL per FIL
pub const FIL_DECIMALS: u32 = 18;

/// Query every role's balance concurrently
///
/// Returns the full mapping or the first error observed. On error the
/// remaining queries are aborted; no partial mapping is ever returned. A node
/// answering with no value at all is a fault for that role, not a zero.
pub async fn fetch_balances(
    chain: Arc<dyn ChainClient>,
    roles: &[(Role, NativeAddress)],
) -> Result<BTreeMap<Role, U256>> {
    let mut seen = BTreeSet::new();
    for (role, _) in roles {
        if !seen.insert(*role) {
            return Err(Error::InvalidArgument(format!(
                "Role {} requested more than once",
                role
            )));
        }
    }

    let mut tasks = JoinSet::new();
    for (role, address) in roles.iter().cloned() {
        let chain = Arc::clone(&chain);
        tasks.spawn(async move {
            let balance = chain
                .wallet_balance(&address)
                .await
                .map_err(|e| Error::BalanceQuery {
                    role,
                    address: address.clone(),
                    reason: e.to_string(),
                })?
                .ok_or_else(|| Error::BalanceQuery {
                    role,
                    address: address.clone(),
                    reason: "node returned no balance".to_string(),
                })?;
            Ok::<_, Error>((role, balance))
        });
    }

    let mut balances = BTreeMap::new();
    while let Some(joined) = tasks.join_next().await {
        let outcome = joined
            .map_err(|e| Error::Rpc(format!("Balance query task failed: {}", e)))
            .and_then(|r| r);
        match outcome {
            Ok((role, balance)) => {
                tracing::debug!(role = %role, balance = %balance, "Fetched balance");
                balances.insert(role, balance);
            }
            Err(e) => {
                tasks.abort_all();
                tracing::warn!(error = %e, "Balance fan-out failed");
                return Err(e);
            }
        }
    }

    Ok(balances)
}

/// Native addresses of every bound role in `roles`, skipping unbound ones
pub async fn bound_role_addresses(
    store: &RoleStore,
    roles: &[Role],
) -> Result<Vec<(Role, NativeAddress)>> {
    let mut out = Vec::with_capacity(roles.len());
    for role in roles {
        if !store.is_bound(*role)? {
            continue;
        }
        let addrs = store.get_addrs(*role, None).await?;
        out.push((*role, addrs.native));
    }
    Ok(out)
}

/// Render an integer amount with `decimals` fractional digits, trailing zeros trimmed
pub fn format_units(value: U256, decimals: u32) -> String {
    if value.is_zero() {
        return "0".to_string();
    }

    let divisor = U256::from(10).pow(U256::from(decimals));
    let whole = value / divisor;
    let remainder = value % divisor;

    if remainder.is_zero() {
        return whole.to_string();
    }
    let remainder_str = format!("{:0>width$}", remainder, width = decimals as usize);
    format!("{}.{}", whole, remainder_str.trim_end_matches('0'))
}

pub fn format_fil(atto: U256) -> String {
    format!("{} FIL", format_units(atto, FIL_DECIMALS))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::mock::{BalanceReply, MockChain};
    use std::time::Duration;

    fn addr(id: u64) -> NativeAddress {
        NativeAddress::new_id(id)
    }

    #[tokio::test]
    async fn test_collects_every_role() {
        let chain = Arc::new(MockChain::new());
        chain.set_balance(&addr(1), BalanceReply::Value(U256::from(10)));
        chain.set_balance(
            &addr(2),
            BalanceReply::Delayed(Duration::from_millis(20), U256::from(20)),
        );

        let balances = fetch_balances(
            chain.clone(),
            &[(Role::Owner, addr(1)), (Role::Operator, addr(2))],
        )
        .await
        .unwrap();

        assert_eq!(balances[&Role::Owner], U256::from(10));
        assert_eq!(balances[&Role::Operator], U256::from(20));
    }

    #[tokio::test]
    async fn test_first_error_wins_without_partial_map() {
        let chain = Arc::new(MockChain::new());
        chain.set_balance(&addr(1), BalanceReply::Value(U256::from(10)));
        chain.set_balance(&addr(2), BalanceReply::Fail("connection refused".to_string()));

        let err = fetch_balances(
            chain,
            &[(Role::Owner, addr(1)), (Role::Requester, addr(2))],
        )
        .await
        .unwrap_err();

        match err {
            Error::BalanceQuery { role, reason, .. } => {
                assert_eq!(role, Role::Requester);
                assert!(reason.contains("connection refused"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_failure_aborts_pending_siblings() {
        let chain = Arc::new(MockChain::new());
        chain.set_balance(
            &addr(1),
            BalanceReply::Delayed(Duration::from_millis(200), U256::from(10)),
        );
        chain.set_balance(&addr(2), BalanceReply::Fail("timeout".to_string()));

        let err = fetch_balances(
            chain.clone(),
            &[(Role::Owner, addr(1)), (Role::Operator, addr(2))],
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::BalanceQuery { role: Role::Operator, .. }));

        // well past the sibling's delay
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(chain.delayed_completed(), 0);
    }

    #[tokio::test]
    async fn test_missing_balance_is_an_error() {
        let chain = Arc::new(MockChain::new());
        chain.set_balance(&addr(3), BalanceReply::Missing);

        let err = fetch_balances(chain, &[(Role::Operator, addr(3))])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("operator"));
    }

    #[tokio::test]
    async fn test_duplicate_roles_rejected() {
        let chain = Arc::new(MockChain::new());
        let err = fetch_balances(chain, &[(Role::Owner, addr(1)), (Role::Owner, addr(2))])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_empty_request() {
        let chain = Arc::new(MockChain::new());
        assert!(fetch_balances(chain, &[]).await.unwrap().is_empty());
    }

    #[test]
    fn test_format_fil() {
        assert_eq!(format_fil(U256::ZERO), "0 FIL");
        assert_eq!(
            format_fil(U256::from(1_500_000_000_000_000_000u128)),
            "1.5 FIL"
        );
        assert_eq!(format_units(U256::from(1u64), 18), "0.000000000000000001");
        assert_eq!(format_units(U256::from(2_000_000u64), 6), "2");
    }
}
