use md5::{Digest, Md5};

use crate::fingerprint::grease::strip_grease;
use crate::fingerprint::types::{ClientHelloInfo, Ja3Fingerprint};

/// Compute the JA3 fingerprint from a parsed ClientHello.
///
/// JA3 format: MD5(SSLVersion,Ciphers,Extensions,EllipticCurves,EcPointFormats)
///
/// - Fields separated by commas, values within a field by dashes
/// - All values in decimal, in wire order
/// - GREASE values removed from ciphers and extensions; curves and point
///   formats are rendered as sent
pub fn compute_ja3(info: &ClientHelloInfo) -> Ja3Fingerprint {
    let raw = format!(
        "{},{},{},{},{}",
        info.tls_version,
        join_dashed(&strip_grease(&info.cipher_suites)),
        join_dashed(&strip_grease(&info.extensions)),
        join_dashed(&info.elliptic_curves),
        join_dashed(&info.ec_point_formats),
    );

    let mut hasher = Md5::new();
    hasher.update(raw.as_bytes());
    let digest = format!("{:x}", hasher.finalize());

    Ja3Fingerprint { raw, digest }
}

fn join_dashed<T: ToString>(values: &[T]) -> String {
    values
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join("-")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::clienthello::parse_client_hello;
    use crate::fingerprint::clienthello::tests::{
        client_hello_record, groups_ext, point_formats_ext,
    };

    fn sample_info() -> ClientHelloInfo {
        ClientHelloInfo {
            tls_version: 0x0303, // 771
            cipher_suites: vec![0x1301, 0x1302, 0x1303, 0xc02b, 0xc02f],
            extensions: vec![0x0000, 0x0017, 0x000a, 0x000b, 0x000d],
            elliptic_curves: vec![0x001d, 0x0017, 0x0018],
            ec_point_formats: vec![0x00],
            server_name: Some("example.com".to_string()),
            alpn_protocols: vec!["h2".to_string()],
        }
    }

    #[test]
    fn renders_canonical_string() {
        let fp = compute_ja3(&sample_info());
        assert_eq!(fp.raw, "771,4865-4866-4867-49195-49199,0-23-10-11-13,29-23-24,0");
        assert_eq!(fp.digest.len(), 32);
        assert!(fp
            .digest
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
        assert_eq!(fp.to_string(), fp.digest);
    }

    #[test]
    fn matches_published_reference_digest() {
        let info = ClientHelloInfo {
            tls_version: 769,
            cipher_suites: vec![47, 53, 5, 10, 49161, 49162, 49171, 49172, 50, 56, 19, 4],
            extensions: vec![0, 10, 11],
            elliptic_curves: vec![23, 24, 25],
            ec_point_formats: vec![0],
            ..ClientHelloInfo::default()
        };
        let fp = compute_ja3(&info);
        assert_eq!(fp.raw, "769,47-53-5-10-49161-49162-49171-49172-50-56-19-4,0-10-11,23-24-25,0");
        assert_eq!(fp.digest, "ada70206e40642a3e4461f35503241d5");
    }

    #[test]
    fn grease_removed_from_ciphers_and_extensions_only() {
        let info = ClientHelloInfo {
            tls_version: 0x0303,
            cipher_suites: vec![0x0a0a, 0x1301, 0xfafa, 0x1302],
            extensions: vec![0x2a2a, 0x0000, 0x000a],
            elliptic_curves: vec![0x4a4a, 0x001d],
            ec_point_formats: vec![0x00],
            ..ClientHelloInfo::default()
        };

        let fp = compute_ja3(&info);
        assert_eq!(fp.raw, "771,4865-4866,0-10,19018-29,0");
    }

    #[test]
    fn empty_lists_render_empty_fields() {
        let info = ClientHelloInfo {
            tls_version: 0x0303,
            ..ClientHelloInfo::default()
        };
        assert_eq!(compute_ja3(&info).raw, "771,,,,");
    }

    #[test]
    fn deterministic_for_identical_bytes() {
        let record = client_hello_record(
            0x0303,
            &[0x1301, 0xc02f],
            &[groups_ext(&[0x001d]), point_formats_ext(&[0, 1])],
        );
        let first = compute_ja3(&parse_client_hello(&record).unwrap());
        for _ in 0..8 {
            assert_eq!(compute_ja3(&parse_client_hello(&record).unwrap()), first);
        }
    }

    #[test]
    fn grease_position_does_not_change_digest() {
        let plain = client_hello_record(
            0x0303,
            &[0x1301, 0x1302, 0xc02f],
            &[(0x0017, vec![]), groups_ext(&[0x001d])],
        );
        let greased = client_hello_record(
            0x0303,
            &[0x3a3a, 0x1301, 0x1302, 0xdada, 0xc02f],
            &[(0xbaba, vec![]), (0x0017, vec![]), groups_ext(&[0x001d]), (0x1a1a, vec![0])],
        );

        let a = compute_ja3(&parse_client_hello(&plain).unwrap());
        let b = compute_ja3(&parse_client_hello(&greased).unwrap());
        assert_eq!(a.digest, b.digest);
    }

    #[test]
    fn cipher_order_changes_digest() {
        let mut info = sample_info();
        let before = compute_ja3(&info);
        info.cipher_suites.swap(0, 1);
        let after = compute_ja3(&info);
        assert_ne!(before.digest, after.digest);
    }

    #[test]
    fn logging_only_fields_do_not_affect_digest() {
        let mut info = sample_info();
        let before = compute_ja3(&info);
        info.server_name = Some("other.example".to_string());
        info.alpn_protocols.clear();
        assert_eq!(compute_ja3(&info), before);
    }
}
