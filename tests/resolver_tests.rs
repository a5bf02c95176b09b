//! Integration tests for host reference resolution.
//!
//! Discovery is replaced by closures returning fixed device lists, so
//! these tests cover:
//! - the identity law for non-symbolic references
//! - prefix matching of server names against discovered devices
//! - the distinct error paths (malformed, service names)
//! - the JSON report printed by the `resolve` subcommand

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::cell::Cell;
use std::time::Duration;

use pretty_assertions::assert_eq;
use proptest::prelude::*;

use horus_deploy::commands;
use horus_deploy::error::{DeployError, Result};
use horus_deploy::host::{
    Address, AddressType, Host, HostResolver, PROP_HARDWARE_ID, PROP_NAME, ResolutionReport,
    classify,
};
use horus_deploy::ssh::CredentialSet;

fn device(server: &str, addrs: &[&str]) -> Host {
    Host::new(server)
        .with_resolved_addrs(addrs.iter().copied())
        .with_prop(PROP_NAME, format!("{}_zmq._tcp.local.", server.trim_end_matches("local.")))
}

fn fleet(devices: Vec<Host>) -> impl Fn(Duration) -> Result<Vec<Host>> {
    move |_| Ok(devices.clone())
}

fn no_discovery(_: Duration) -> Result<Vec<Host>> {
    panic!("discovery must not run for non-symbolic references");
}

// ============================================================================
// Identity
// ============================================================================

mod identity_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_ip_and_hostname_resolve_to_themselves() {
        let resolver = HostResolver::new(no_discovery);

        for raw in ["10.0.0.5", "fe80::1", "build-server", "example.com"] {
            let host = resolver.resolve(&Host::new(raw)).unwrap().unwrap();
            assert_eq!(host.resolved_addrs, vec![Address::new(raw)], "{}", raw);
        }
    }

    proptest! {
        #[test]
        fn test_identity_law_ipv4(a in 0u8..=255, b in 0u8..=255, c in 0u8..=255, d in 0u8..=255) {
            let raw = format!("{}.{}.{}.{}", a, b, c, d);
            let resolver = HostResolver::new(no_discovery);
            let host = resolver.resolve(&Host::new(raw.as_str())).unwrap().unwrap();
            prop_assert_eq!(host.resolved_addrs, vec![Address::new(raw.as_str())]);
        }

        #[test]
        fn test_identity_law_hostnames(name in "[a-z][a-z0-9-]{0,20}(\\.[a-z]{2,5})?") {
            prop_assume!(classify(&name) == AddressType::HostName);
            let resolver = HostResolver::new(no_discovery);
            let host = resolver.resolve(&Host::new(name.as_str())).unwrap().unwrap();
            prop_assert_eq!(host.resolved_addrs, vec![Address::new(name.as_str())]);
        }
    }
}

// ============================================================================
// Server Name Matching
// ============================================================================

mod server_name_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_symbolic_device_resolves_to_discovered_address() {
        let resolver = HostResolver::new(fleet(vec![device(
            "device-4F2D7-2.local.",
            &["10.0.0.5"],
        )]));

        let host = resolver
            .resolve(&Host::new("device-4F2D7-2.local."))
            .unwrap()
            .unwrap();
        assert_eq!(host.resolved_addrs, vec![Address::new("10.0.0.5")]);
        assert_eq!(host.addr.as_str(), "device-4F2D7-2.local.");
    }

    #[test]
    fn test_numeric_suffix_matches_renamed_device() {
        // The device came back as -3 after a name conflict.
        let resolver = HostResolver::new(fleet(vec![device(
            "device-4F2D7-3.local.",
            &["10.0.0.8"],
        )]));

        let host = resolver
            .resolve(&Host::new("device-4F2D7-2.local."))
            .unwrap()
            .unwrap();
        assert_eq!(host.resolved_addrs, vec![Address::new("10.0.0.8")]);
    }

    #[test]
    fn test_no_match_is_not_found() {
        let resolver = HostResolver::new(fleet(vec![device("other-1.local.", &["10.0.0.9"])]));

        let outcome = resolver.resolve(&Host::new("device-4F2D7.local.")).unwrap();
        assert_eq!(outcome, None);

        let err = resolver
            .resolve_required(&Host::new("device-4F2D7.local."))
            .unwrap_err();
        assert!(matches!(err, DeployError::ResolutionNotFound(_)));
    }

    #[test]
    fn test_match_requires_local_domain() {
        let resolver = HostResolver::new(fleet(vec![
            device("device-4F2D7.example.com.", &["192.0.2.1"]),
            device("device-4F2D7.local.", &["10.0.0.5"]),
        ]));

        let host = resolver
            .resolve(&Host::new("device-4F2D7.local."))
            .unwrap()
            .unwrap();
        assert_eq!(host.resolved_addrs, vec![Address::new("10.0.0.5")]);
    }

    #[test]
    fn test_first_match_in_discovery_order_wins() {
        let resolver = HostResolver::new(fleet(vec![
            device("device-4F2D7-1.local.", &["10.0.0.1"]),
            device("device-4F2D7-2.local.", &["10.0.0.2"]),
        ]));

        let host = resolver
            .resolve(&Host::new("device-4F2D7-2.local."))
            .unwrap()
            .unwrap();
        assert_eq!(host.resolved_addrs, vec![Address::new("10.0.0.1")]);
    }

    #[test]
    fn test_other_fields_are_preserved() {
        let resolver = HostResolver::new(fleet(vec![device("dev.local.", &["10.0.0.5"])]));
        let mut input = Host::new("dev.local.").with_prop(PROP_HARDWARE_ID, "HW-1");
        input.ssh_params = Some(CredentialSet::user("root"));

        let host = resolver.resolve(&input).unwrap().unwrap();
        assert_eq!(host.ssh_params, Some(CredentialSet::user("root")));
        assert_eq!(host.hardware_id(), Some("HW-1"));
    }

    #[test]
    fn test_discovery_runs_with_configured_wait() {
        let seen = Cell::new(Duration::ZERO);
        let source = |wait: Duration| {
            seen.set(wait);
            Ok(Vec::new())
        };

        let resolver = HostResolver::new(source).with_wait(Duration::from_millis(750));
        resolver.resolve(&Host::new("dev.local.")).unwrap();
        assert_eq!(seen.get(), Duration::from_millis(750));
    }
}

// ============================================================================
// Error Paths
// ============================================================================

mod error_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_service_name_is_unimplemented() {
        let resolver = HostResolver::new(no_discovery);
        let err = resolver
            .resolve(&Host::new("device-4F2D7._zmq._tcp.local."))
            .unwrap_err();
        assert!(matches!(err, DeployError::UnimplementedResolutionKind(_)));
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_malformed_server_name_fails_before_discovery() {
        let resolver = HostResolver::new(no_discovery);
        let err = resolver.resolve(&Host::new(".local.")).unwrap_err();
        assert!(matches!(err, DeployError::MalformedSymbolicAddress(_)));
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_discovery_failure_propagates() {
        let resolver = HostResolver::new(|_: Duration| -> Result<Vec<Host>> {
            Err(DeployError::Discovery("no multicast interface".into()))
        });
        let err = resolver.resolve(&Host::new("dev.local.")).unwrap_err();
        assert!(matches!(err, DeployError::Discovery(_)));
    }
}

// ============================================================================
// Resolve Subcommand Output
// ============================================================================

mod report_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn run_resolve<D: horus_deploy::host::DeviceSource>(
        resolver: &HostResolver<D>,
        reference: &str,
    ) -> Result<ResolutionReport> {
        let mut out = Vec::new();
        commands::resolve(resolver, reference, &mut out)?;
        Ok(serde_json::from_slice(&out).unwrap())
    }

    #[test]
    fn test_found_prints_results() {
        let resolver = HostResolver::new(fleet(vec![device(
            "device-4F2D7-2.local.",
            &["10.0.0.5", "fe80::5"],
        )]));

        let report = run_resolve(&resolver, "device-4F2D7-2.local.").unwrap();
        assert_eq!(
            report,
            ResolutionReport::Results {
                results: vec!["10.0.0.5".into(), "fe80::5".into()]
            }
        );
    }

    #[test]
    fn test_empty_network_prints_warning() {
        let resolver = HostResolver::new(fleet(Vec::new()));

        let report = run_resolve(&resolver, "device-4F2D7-2.local.").unwrap();
        assert_eq!(
            report,
            ResolutionReport::Warning {
                warning: vec!["could not resolve device-4F2D7-2.local.".into()]
            }
        );
    }

    #[test]
    fn test_internal_error_is_not_a_report() {
        let resolver = HostResolver::new(no_discovery);
        let err = run_resolve(&resolver, "svc._zmq._tcp.local.").unwrap_err();
        assert!(matches!(err, DeployError::UnimplementedResolutionKind(_)));
    }

    #[test]
    fn test_resolve_target_orders_ipv4_first() {
        let resolver = HostResolver::new(fleet(vec![device(
            "dev.local.",
            &["fe80::5", "10.0.0.5"],
        )]));

        let host = commands::resolve_target(&resolver, "dev.local.").unwrap();
        let order: Vec<&str> = host.resolved_addrs.iter().map(Address::as_str).collect();
        assert_eq!(order, vec!["10.0.0.5", "fe80::5"]);
    }
}
