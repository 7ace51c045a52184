//! Races on single-use codes and refresh tokens.
//!
//! Every contender runs on its own thread with its own provider handle; for
//! SQLite each handle is a separate connection to one database file.

use std::sync::Barrier;
use std::thread;

use idp_core::EventType;
use idp_protocol_oidc::{OidcResult, TokenSet};
use idp_storage::conformance;
use pretty_assertions::assert_eq;

use crate::common::{BACKENDS, TestEnv, credentials, exchange_request, refresh_request};

const CONTENDERS: usize = 8;

fn split(results: Vec<OidcResult<TokenSet>>) -> anyhow::Result<(Vec<TokenSet>, usize)> {
    let mut winners = Vec::new();
    let mut losers = 0;
    for result in results {
        match result {
            Ok(set) => winners.push(set),
            Err(err) if err.error_code() == "invalid_grant" => losers += 1,
            Err(err) => anyhow::bail!("unexpected failure: {err}"),
        }
    }
    Ok((winners, losers))
}

/// Tests that of many simultaneous exchanges of one code exactly one wins.
#[test]
fn test_concurrent_code_exchange_has_one_winner() -> anyhow::Result<()> {
    for backend in BACKENDS {
        let env = TestEnv::new(backend)?;
        let app = env.register_confidential("openid offline_access")?;
        let creds = credentials(&app);
        let code = env.authorize(&app.client.client_id, "openid offline_access")?;

        let handles = env.handles(CONTENDERS)?;
        let barrier = Barrier::new(CONTENDERS);
        let request = exchange_request(&creds, &code);
        let (barrier, request) = (&barrier, &request);

        let results: Vec<OidcResult<TokenSet>> = thread::scope(|scope| {
            let threads: Vec<_> = handles
                .iter()
                .map(|provider| {
                    scope.spawn(move || {
                        barrier.wait();
                        provider.tokens().exchange_code(request)
                    })
                })
                .collect();
            threads
                .into_iter()
                .map(|t| t.join().unwrap_or_else(|_| panic!("exchange thread panicked")))
                .collect()
        });

        let (winners, losers) = split(results)?;
        assert_eq!(winners.len(), 1, "{backend:?}");
        assert_eq!(losers, CONTENDERS - 1);

        // Losers are replays: the winner's grant is revoked.
        let winner = &winners[0];
        assert!(env.record(&winner.access_token)?.revoked, "{backend:?}");
        let refresh = winner.refresh_token.as_deref().ok_or_else(|| anyhow::anyhow!("no refresh"))?;
        assert_eq!(env.refresh(&creds, refresh).unwrap_err().error_code(), "invalid_grant");

        assert_eq!(env.events.events_of(EventType::CodeToToken).len(), 1);
        assert_eq!(
            env.events.events_of(EventType::CodeReplayDetected).len(),
            CONTENDERS - 1
        );
    }
    Ok(())
}

/// Tests that of many simultaneous refreshes of one token exactly one wins
/// and the losers revoke the chain.
#[test]
fn test_concurrent_refresh_has_one_winner() -> anyhow::Result<()> {
    for backend in BACKENDS {
        let env = TestEnv::new(backend)?;
        let app = env.register_confidential("openid offline_access")?;
        let creds = credentials(&app);
        let r1 = env
            .login(&app, "openid offline_access")?
            .refresh_token
            .ok_or_else(|| anyhow::anyhow!("no refresh token"))?;

        let handles = env.handles(CONTENDERS)?;
        let barrier = Barrier::new(CONTENDERS);
        let request = refresh_request(&creds, &r1);
        let (barrier, request) = (&barrier, &request);

        let results: Vec<OidcResult<TokenSet>> = thread::scope(|scope| {
            let threads: Vec<_> = handles
                .iter()
                .map(|provider| {
                    scope.spawn(move || {
                        barrier.wait();
                        provider.tokens().refresh(request)
                    })
                })
                .collect();
            threads
                .into_iter()
                .map(|t| t.join().unwrap_or_else(|_| panic!("refresh thread panicked")))
                .collect()
        });

        let (winners, losers) = split(results)?;
        assert_eq!(winners.len(), 1, "{backend:?}");
        assert_eq!(losers, CONTENDERS - 1);

        let r2 = winners[0]
            .refresh_token
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("no rotated token"))?;
        assert!(env.record(r2)?.revoked, "{backend:?}");
        assert_eq!(env.refresh(&creds, r2).unwrap_err().error_code(), "invalid_grant");
        assert!(!env.events.events_of(EventType::RefreshTokenReuseDetected).is_empty());
    }
    Ok(())
}

/// Runs the shared persistence suite against each adapter as wired here.
#[test]
fn test_store_conformance() -> anyhow::Result<()> {
    for backend in BACKENDS {
        let env = TestEnv::new(backend)?;
        conformance::run_all(env.store.as_ref())?;
    }
    Ok(())
}
