//! Round-trip and ordering properties of the resource stream codec.

use apptest_kio::{decode, encode, encode_resource_list, Resource};

const SAMPLES: &[&str] = &[
    "a: 1\n---\nb: 2\n",
    "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: settings\ndata:\n  mode: fast\n",
    "spec:\n  containers:\n    - name: app\n      args:\n        - --port\n        - '8080'\n",
    "- one\n- two\n",
    "script: |\n  #!/bin/sh\n  echo hi\nempty: {}\n---\n# comment only\n---\nz: null\n",
];

fn stripped(resources: &[Resource]) -> Vec<Resource> {
    resources
        .iter()
        .cloned()
        .map(|mut r| {
            r.clear_provenance();
            r
        })
        .collect()
}

/// Test: decode(encode(decode(b))) == decode(b) once provenance is stripped
#[test]
fn test_round_trip_is_idempotent() {
    for sample in SAMPLES {
        let first = decode(sample.as_bytes()).expect("decode sample");
        let encoded = encode(&first.items, true).expect("encode sample");
        let second = decode(encoded.as_bytes()).expect("decode re-encoded sample");

        assert_eq!(
            stripped(&first.items),
            stripped(&second.items),
            "round trip changed {sample:?}"
        );

        let again = encode(&second.items, true).expect("encode twice");
        assert_eq!(encoded, again, "encoding is not reproducible for {sample:?}");
    }
}

/// Test: order is preserved through decode, envelope and encode
#[test]
fn test_order_is_preserved() {
    let input: String = (0..20)
        .map(|i| format!("id: {i}\n"))
        .collect::<Vec<_>>()
        .join("---\n");

    let stream = decode(input.as_bytes()).unwrap();
    let list = encode_resource_list(&stream).unwrap();
    let back = decode(list.as_bytes()).unwrap();

    let ids: Vec<u64> = back
        .iter()
        .map(|r| r.body()["id"].as_u64().unwrap())
        .collect();
    assert_eq!(ids, (0..20).collect::<Vec<_>>());

    let indexes: Vec<usize> = back
        .iter()
        .map(|r| r.provenance().index.unwrap())
        .collect();
    assert_eq!(indexes, (0..20).collect::<Vec<_>>());

    assert_eq!(encode(&back.items, true).unwrap(), input);
}

/// Test: stripped output never mentions provenance keys
#[test]
fn test_stripped_output_is_clean() {
    let stream = decode(SAMPLES[1].as_bytes()).unwrap();
    let list = encode_resource_list(&stream).unwrap();
    let back = decode(list.as_bytes()).unwrap();
    let out = encode(&back.items, true).unwrap();

    assert!(!out.contains("config.kubernetes.io"));
    assert_eq!(out, SAMPLES[1]);
}
