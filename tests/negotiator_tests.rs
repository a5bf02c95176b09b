//! Integration tests for credential negotiation.
//!
//! A scripted transport decides which (address, credential set) pairs
//! authenticate. These tests verify:
//! - candidate priority, including skipped missing key files
//! - that stored address order is never changed
//! - the built-in fallback chain built from real key material
//! - parallel negotiation of several hosts

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod support;

use std::path::PathBuf;

use pretty_assertions::assert_eq;

use horus_deploy::commands;
use horus_deploy::error::{ConnectError, DeployError};
use horus_deploy::host::{Address, Host};
use horus_deploy::ssh::{
    CredentialChain, CredentialNegotiator, CredentialSet, FALLBACK_USER, FallbackOrder,
    KeyMaterial,
};
use support::ScriptedTransport;

fn denied() -> Result<(), ConnectError> {
    Err(ConnectError::Auth("permission denied".into()))
}

// ============================================================================
// Candidate Priority
// ============================================================================

mod priority_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_missing_key_then_rejected_then_accepted() {
        let k2 = tempfile::NamedTempFile::new().unwrap();
        let k3 = tempfile::NamedTempFile::new().unwrap();
        let k2_path = k2.path().to_path_buf();
        let k3_path = k3.path().to_path_buf();

        let accepted = k3_path.clone();
        let transport = ScriptedTransport::new(move |_, creds| {
            if creds.key_path.as_ref() == Some(&accepted) {
                Ok(())
            } else {
                denied()
            }
        });

        let chain = CredentialChain::from_candidates(vec![
            CredentialSet::key("/missing/path/k1"),
            CredentialSet::key(&k2_path),
            CredentialSet::key(&k3_path),
        ]);
        let negotiator = CredentialNegotiator::new(transport, chain);
        let host = Host::new("10.0.0.5").with_resolved_addrs(["10.0.0.5"]);

        let negotiated = negotiator.negotiate(&host, None).unwrap();
        assert_eq!(negotiated.ssh_params, Some(CredentialSet::key(&k3_path)));
        assert_eq!(negotiated.ssh_host, Some(Address::new("10.0.0.5")));

        // K1 was skipped without an attempt.
        let tried: Vec<Option<PathBuf>> = negotiator
            .transport()
            .attempts()
            .into_iter()
            .map(|(_, c)| c.key_path)
            .collect();
        assert_eq!(tried, vec![Some(k2_path), Some(k3_path)]);
    }

    #[test]
    fn test_missing_key_falls_through_to_plain_root() {
        let transport = ScriptedTransport::new(|_, creds| {
            if *creds == CredentialSet::user("root") {
                Ok(())
            } else {
                denied()
            }
        });
        let chain = CredentialChain::from_candidates(vec![
            CredentialSet::key("/missing/path"),
            CredentialSet::user("root"),
        ]);
        let negotiator = CredentialNegotiator::new(transport, chain);
        let host = Host::new("10.0.0.5").with_resolved_addrs(["10.0.0.5"]);

        let negotiated = negotiator.negotiate(&host, None).unwrap();
        assert_eq!(negotiated.ssh_params, Some(CredentialSet::user("root")));
        assert_eq!(negotiator.transport().attempts().len(), 1);
    }

    #[test]
    fn test_user_supplied_set_is_tried_first() {
        let supplied = CredentialSet::user("admin").with_password("secret");
        let expected = supplied.clone();
        let transport = ScriptedTransport::new(move |_, creds| {
            if *creds == expected { Ok(()) } else { denied() }
        });
        let chain = CredentialChain::from_candidates(vec![CredentialSet::user("root")]);
        let negotiator = CredentialNegotiator::new(transport, chain);
        let host = Host::new("10.0.0.5").with_resolved_addrs(["10.0.0.5"]);

        let negotiated = negotiator.negotiate(&host, Some(&supplied)).unwrap();
        assert_eq!(negotiated.ssh_params, Some(supplied));
        assert_eq!(negotiator.transport().attempts().len(), 1);
    }

    #[test]
    fn test_sets_are_never_merged() {
        // Only user "admin" with the port from the flags would work; the
        // fallback "root" set must not borrow that port.
        let transport = ScriptedTransport::new(|_, creds| {
            if creds.user.as_deref() == Some("root") && creds.port.is_some() {
                Ok(())
            } else {
                denied()
            }
        });
        let chain = CredentialChain::from_candidates(vec![CredentialSet::user("root")]);
        let negotiator = CredentialNegotiator::new(transport, chain);
        let host = Host::new("10.0.0.5").with_resolved_addrs(["10.0.0.5"]);
        let supplied = CredentialSet::user("admin").with_port(2222);

        let err = negotiator.negotiate(&host, Some(&supplied)).unwrap_err();
        assert!(matches!(err, DeployError::CredentialsExhausted(_)));
    }
}

// ============================================================================
// Address Order
// ============================================================================

mod address_order_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_stored_order_is_kept() {
        let transport = ScriptedTransport::new(|addr, _| {
            if addr.as_str() == "10.0.0.5" { Ok(()) } else { denied() }
        });
        let chain = CredentialChain::from_candidates(vec![
            CredentialSet::user("root"),
            CredentialSet::user("admin"),
        ]);
        let negotiator = CredentialNegotiator::new(transport, chain);
        let host = Host::new("dev.local.").with_resolved_addrs(["fe80::5", "10.0.0.5"]);

        let negotiated = negotiator.negotiate(&host, None).unwrap();
        assert_eq!(negotiated.ssh_host, Some(Address::new("10.0.0.5")));
        assert_eq!(
            negotiator.transport().attempted_addresses(),
            vec!["fe80::5", "fe80::5", "10.0.0.5"]
        );
        // The input order is untouched in the result.
        assert_eq!(negotiated.resolved_addrs, host.resolved_addrs);
    }

    #[test]
    fn test_exhaustion_lists_every_address() {
        let negotiator = CredentialNegotiator::new(
            ScriptedTransport::new(|_, _| denied()),
            CredentialChain::from_candidates(vec![CredentialSet::user("root")]),
        );
        let host = Host::new("dev.local.").with_resolved_addrs(["10.0.0.5", "fe80::5"]);

        let err = negotiator.negotiate(&host, None).unwrap_err();
        match err {
            DeployError::CredentialsExhausted(addrs) => {
                assert_eq!(addrs, vec!["10.0.0.5", "fe80::5"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_unreachable_everywhere_is_network_error() {
        let negotiator = CredentialNegotiator::new(
            ScriptedTransport::unreachable(),
            CredentialChain::from_candidates(vec![
                CredentialSet::user("root"),
                CredentialSet::user("admin"),
            ]),
        );
        let host = Host::new("dev.local.").with_resolved_addrs(["10.0.0.5", "10.0.0.6"]);

        let err = negotiator.negotiate(&host, None).unwrap_err();
        match err {
            DeployError::Network { address, .. } => assert_eq!(address, "10.0.0.5"),
            other => panic!("unexpected error: {other}"),
        }
        // One attempt per address; the second candidate is never tried.
        assert_eq!(
            negotiator.transport().attempted_addresses(),
            vec!["10.0.0.5", "10.0.0.6"]
        );
    }
}

// ============================================================================
// Built-in Chain
// ============================================================================

mod builtin_chain_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_plain_first_order() {
        let dir = tempfile::tempdir().unwrap();
        let keys = KeyMaterial::init(dir.path()).unwrap();
        let chain = CredentialChain::builtin(&keys, FallbackOrder::PlainFirst);

        assert_eq!(
            chain.candidates(None),
            vec![
                CredentialSet::user(FALLBACK_USER),
                CredentialSet::user(FALLBACK_USER).with_key(keys.user_private_path()),
                CredentialSet::user(FALLBACK_USER).with_key(keys.default_private_path()),
            ]
        );
    }

    #[test]
    fn test_keyed_first_order() {
        let dir = tempfile::tempdir().unwrap();
        let keys = KeyMaterial::init(dir.path()).unwrap();
        let chain = CredentialChain::builtin(&keys, FallbackOrder::KeyedFirst);

        let candidates = chain.candidates(None);
        assert_eq!(candidates.len(), 3);
        assert_eq!(candidates[2], CredentialSet::user(FALLBACK_USER));
        assert!(candidates[..2].iter().all(|c| !c.key_missing()));
    }

    #[test]
    fn test_default_key_reaches_fresh_device() {
        let dir = tempfile::tempdir().unwrap();
        let keys = KeyMaterial::init(dir.path()).unwrap();
        let default_key = keys.default_private_path().to_path_buf();

        let transport = ScriptedTransport::new(move |_, creds| {
            if creds.key_path.as_deref() == Some(default_key.as_path()) {
                Ok(())
            } else {
                denied()
            }
        });
        let negotiator = CredentialNegotiator::new(
            transport,
            CredentialChain::builtin(&keys, FallbackOrder::PlainFirst),
        );
        let host = Host::new("10.0.0.5").with_resolved_addrs(["10.0.0.5"]);

        let negotiated = negotiator.negotiate(&host, None).unwrap();
        let params = negotiated.ssh_params.unwrap();
        assert_eq!(params.user.as_deref(), Some(FALLBACK_USER));
        assert_eq!(params.key_path.as_deref(), Some(keys.default_private_path()));
        assert_eq!(negotiator.transport().attempts().len(), 3);
    }
}

// ============================================================================
// Several Hosts
// ============================================================================

mod parallel_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_negotiate_all_keeps_input_order() {
        let transport = ScriptedTransport::new(|addr, creds| {
            let wanted = if addr.as_str().ends_with(".1") { "root" } else { "admin" };
            if creds.user.as_deref() == Some(wanted) { Ok(()) } else { denied() }
        });
        let negotiator = CredentialNegotiator::new(
            transport,
            CredentialChain::from_candidates(vec![
                CredentialSet::user("root"),
                CredentialSet::user("admin"),
            ]),
        );
        let hosts: Vec<Host> = (1..=4)
            .map(|i| {
                let ip = format!("10.0.0.{}", i);
                Host::new(ip.as_str()).with_resolved_addrs([ip.as_str()])
            })
            .collect();

        let negotiated = commands::negotiate_all(&negotiator, &hosts, None).unwrap();
        let users: Vec<_> = negotiated
            .iter()
            .map(|h| h.ssh_params.as_ref().unwrap().user.clone().unwrap())
            .collect();
        assert_eq!(users, vec!["root", "admin", "admin", "admin"]);
        let addrs: Vec<_> = negotiated.iter().map(|h| h.addr.to_string()).collect();
        assert_eq!(addrs, vec!["10.0.0.1", "10.0.0.2", "10.0.0.3", "10.0.0.4"]);
    }

    #[test]
    fn test_negotiate_all_reports_failure() {
        let transport = ScriptedTransport::new(|addr, _| {
            if addr.as_str() == "10.0.0.2" { denied() } else { Ok(()) }
        });
        let negotiator = CredentialNegotiator::new(
            transport,
            CredentialChain::from_candidates(vec![CredentialSet::user("root")]),
        );
        let hosts = vec![
            Host::new("10.0.0.1").with_resolved_addrs(["10.0.0.1"]),
            Host::new("10.0.0.2").with_resolved_addrs(["10.0.0.2"]),
        ];

        let err = commands::negotiate_all(&negotiator, &hosts, None).unwrap_err();
        assert_eq!(err.to_string(), "cannot find SSH parameters for: 10.0.0.2");
    }

    #[test]
    fn test_negotiated_host_serializes_for_inventory() {
        let mut host = Host::new("dev.local.").with_resolved_addrs(["10.0.0.5"]);
        host.ssh_host = Some(Address::new("10.0.0.5"));
        host.ssh_params = Some(CredentialSet::user("root").with_port(22));

        let json: serde_json::Value = serde_json::to_value(&host).unwrap();
        assert_eq!(json["ssh_host"], "10.0.0.5");
        assert_eq!(json["ssh_params"]["ssh_user"], "root");
        assert_eq!(json["ssh_params"]["ssh_port"], 22);
        assert!(json["ssh_params"].get("ssh_password").is_none());
    }
}
