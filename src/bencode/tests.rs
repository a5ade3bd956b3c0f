use std::collections::BTreeMap;

use bytes::Bytes;

use super::*;

#[test]
fn test_decode_integer() {
    assert_eq!(decode(b"i42e").unwrap(), Value::Integer(42));
    assert_eq!(decode(b"i-42e").unwrap(), Value::Integer(-42));
    assert_eq!(decode(b"i0e").unwrap(), Value::Integer(0));
}

#[test]
fn test_decode_integer_rejects_non_minimal() {
    assert!(decode(b"i-0e").is_err());
    assert!(decode(b"i03e").is_err());
    assert!(decode(b"i+3e").is_err());
    assert!(decode(b"ie").is_err());
    assert!(decode(b"i-e").is_err());
}

#[test]
fn test_decode_bytes() {
    assert_eq!(
        decode(b"4:spam").unwrap(),
        Value::Bytes(Bytes::from_static(b"spam"))
    );
    assert_eq!(decode(b"0:").unwrap(), Value::Bytes(Bytes::from_static(b"")));
}

#[test]
fn test_decode_list() {
    let result = decode(b"l4:spami42ee").unwrap();
    match result {
        Value::List(l) => {
            assert_eq!(l.len(), 2);
            assert_eq!(l[0], Value::Bytes(Bytes::from_static(b"spam")));
            assert_eq!(l[1], Value::Integer(42));
        }
        _ => panic!("expected list"),
    }
}

#[test]
fn test_decode_dict() {
    let result = decode(b"d3:cow3:moo4:spam4:eggse").unwrap();
    match result {
        Value::Dict(d) => {
            assert_eq!(d.len(), 2);
            assert_eq!(
                d.get(&Bytes::from_static(b"cow")),
                Some(&Value::Bytes(Bytes::from_static(b"moo")))
            );
        }
        _ => panic!("expected dict"),
    }
}

#[test]
fn test_decode_dict_rejects_duplicate_keys() {
    assert!(matches!(
        decode(b"d3:cow3:moo3:cowi1ee"),
        Err(BencodeError::DuplicateKey(_))
    ));
}

#[test]
fn test_trailing_data_error() {
    assert!(decode(b"i42eextra").is_err());
    assert!(decode(b"le0:").is_err());
}

#[test]
fn test_truncated_input() {
    assert!(matches!(decode(b"d3:cow"), Err(BencodeError::UnexpectedEof)));
    assert!(matches!(decode(b"5:ab"), Err(BencodeError::UnexpectedEof)));
    assert!(matches!(decode(b"l"), Err(BencodeError::UnexpectedEof)));
}

#[test]
fn test_encode_integer() {
    assert_eq!(encode(&Value::Integer(42)).unwrap(), b"i42e");
    assert_eq!(encode(&Value::Integer(-42)).unwrap(), b"i-42e");
    assert_eq!(encode(&Value::Integer(0)).unwrap(), b"i0e");
}

#[test]
fn test_encode_dict_sorts_keys() {
    let mut dict = BTreeMap::new();
    dict.insert(Bytes::from_static(b"zz"), Value::Integer(1));
    dict.insert(Bytes::from_static(b"aa"), Value::Integer(2));
    assert_eq!(encode(&Value::Dict(dict)).unwrap(), b"d2:aai2e2:zzi1ee");
}

#[test]
fn test_roundtrip() {
    let original = b"d8:announce15:http://test.com4:infod4:name4:test12:piece lengthi16384eee";
    let decoded = decode(original).unwrap();
    let encoded = encode(&decoded).unwrap();
    assert_eq!(encoded, original);
}

#[test]
fn test_nested_structures() {
    let data = b"d4:listl4:spami42eee";
    let decoded = decode(data).unwrap();
    let encoded = encode(&decoded).unwrap();
    assert_eq!(encoded, data);
}

#[test]
fn test_canonical_form_is_a_fixed_point() {
    // A structured value covering every type, with dictionary entries
    // inserted out of order and a byte string that is not valid UTF-8.
    let mut file = BTreeMap::new();
    file.insert(Bytes::from_static(b"path"), Value::string("sub/dir"));
    file.insert(Bytes::from_static(b"length"), Value::Integer(20480));

    let mut root = BTreeMap::new();
    root.insert(
        Bytes::from_static(b"pieces"),
        Value::Bytes(Bytes::from_static(&[0x00, 0xFF, 0x13, 0x37])),
    );
    root.insert(Bytes::from_static(b"empty"), Value::string(""));
    root.insert(
        Bytes::from_static(b"files"),
        Value::List(vec![Value::Dict(file), Value::Integer(-1), Value::Integer(0)]),
    );
    let value = Value::Dict(root);

    // The canonical form is exact: keys sorted regardless of insertion
    // order, integers minimal, binary strings byte-for-byte.
    let mut expected = Vec::new();
    expected.extend_from_slice(b"d5:empty0:5:filesl");
    expected.extend_from_slice(b"d6:lengthi20480e4:path7:sub/diree");
    expected.extend_from_slice(b"i-1ei0ee6:pieces4:");
    expected.extend_from_slice(&[0x00, 0xFF, 0x13, 0x37]);
    expected.extend_from_slice(b"e");

    let encoded = encode(&value).unwrap();
    assert_eq!(encoded, expected);

    // decode ∘ encode is the identity on values, and encode ∘ decode is
    // the identity on canonical bytes: re-encoding is a fixed point.
    assert_eq!(decode(&encoded).unwrap(), value);
    assert_eq!(encode(&decode(&encoded).unwrap()).unwrap(), encoded);
}

#[test]
fn test_nesting_limit() {
    let mut deep = Vec::new();
    deep.extend(std::iter::repeat(b'l').take(100));
    deep.extend(std::iter::repeat(b'e').take(100));
    assert!(matches!(decode(&deep), Err(BencodeError::NestingTooDeep)));
}

#[test]
fn test_value_span_finds_verbatim_bytes() {
    let data = b"d8:announce15:http://test.com4:infod4:name4:test12:piece lengthi16384eee";
    let span = value_span(data, b"info").unwrap().unwrap();
    assert_eq!(&data[span], b"d4:name4:test12:piece lengthi16384ee".as_slice());
}

#[test]
fn test_value_span_missing_key() {
    let data = b"d3:fooi1ee";
    assert!(value_span(data, b"bar").unwrap().is_none());
}

#[test]
fn test_value_span_rejects_non_dict() {
    assert!(value_span(b"i42e", b"info").is_err());
    assert!(value_span(b"d3:foo", b"info").is_err());
}

#[test]
fn test_value_accessors() {
    let value = Value::Integer(42);
    assert_eq!(value.as_integer(), Some(42));
    assert_eq!(value.as_str(), None);

    let dict = decode(b"d3:foo3:bare").unwrap();
    assert_eq!(dict.get(b"foo").and_then(|v| v.as_str()), Some("bar"));
    assert_eq!(dict.get(b"missing"), None);
}
