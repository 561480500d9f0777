use netsweep::ports::{parse_port_range, service_name, DISCOVERY_PORTS, SERVICE_PORTS};

#[test]
fn parse_ranges_for_cli() {
    assert_eq!(parse_port_range("1-1024").expect("parse ok"), (1, 1024));
    assert_eq!(parse_port_range("65535").expect("parse ok"), (65535, 65535));
    assert!(parse_port_range("1024-1").is_err());
}

#[test]
fn port_tables_match_sweep_plan() {
    assert_eq!(DISCOVERY_PORTS, &[80, 443, 22, 53, 445, 139]);
    assert_eq!(SERVICE_PORTS.len(), 9);
    assert_eq!(service_name(3389), "RDP");
    assert_eq!(service_name(32400), "Plex");
    assert_eq!(service_name(1), "");
}
