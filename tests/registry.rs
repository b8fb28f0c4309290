use isobmff_codec::known_boxes::standard_registry;
use isobmff_codec::{Error, FieldDef, FourCC, Registry, Schema, default_registry};

#[test]
fn registering_a_type_twice_is_rejected() {
    let res = Registry::builder()
        .register(FourCC::new(b"test"), Schema::container(), &[])
        .unwrap()
        .register(
            FourCC::new(b"test"),
            Schema::new(vec![FieldDef::uint("x", 8)]),
            &[],
        );
    assert!(matches!(res, Err(Error::Schema(_))));
}

#[test]
fn version_sets_gate_support() {
    let reg = Registry::builder()
        .register(FourCC::new(b"vers"), Schema::full_box(vec![]), &[0, 1])
        .unwrap()
        .register(FourCC::new(b"anyv"), Schema::full_box(vec![]), &[])
        .unwrap()
        .build();

    assert!(reg.is_supported_version(FourCC::new(b"vers"), 1));
    assert!(!reg.is_supported_version(FourCC::new(b"vers"), 2));
    assert!(reg.is_supported_version(FourCC::new(b"anyv"), 200));
    assert!(reg.is_supported_version(FourCC::new(b"none"), 3));
    assert_eq!(reg.supported_versions(FourCC::new(b"vers")), Some(&[0u8, 1][..]));
    assert_eq!(reg.supported_versions(FourCC::new(b"none")), None);
}

#[test]
fn new_box_only_for_registered_types() {
    let reg = Registry::builder()
        .register(FourCC::new(b"test"), Schema::full_box(vec![]), &[])
        .unwrap()
        .build();

    let v = reg.new_box(FourCC::new(b"test")).expect("registered");
    assert_eq!(v.box_type(), FourCC::new(b"test"));
    assert!(v.schema().is_full_box());
    assert!(v.fields.is_empty());

    assert!(reg.new_box(FourCC::new(b"nope")).is_none());
    assert!(!reg.is_supported_type(FourCC::new(b"nope")));
    assert_eq!(reg.len(), 1);
}

#[test]
fn standard_catalog_builds() {
    let reg = standard_registry().expect("catalog registers each type once");
    for t in [b"moov", b"mvhd", b"trun", b"esds", b"meta", b"url "] {
        assert!(reg.is_supported_type(FourCC::new(t)), "{}", FourCC::new(t));
    }
    assert!(!reg.is_supported_type(FourCC::new(b"avc1")));
    assert_eq!(reg.len(), default_registry().len());
}

#[test]
fn default_registry_is_shared() {
    let a = default_registry() as *const Registry;
    let b = default_registry() as *const Registry;
    assert_eq!(a, b);
    assert!(default_registry().lookup(FourCC::new(b"moov")).unwrap().schema.children);
}

#[test]
fn fourcc_parsing() {
    assert_eq!("moov".parse::<FourCC>().unwrap(), FourCC::new(b"moov"));
    assert!("mo".parse::<FourCC>().is_err());
    assert_eq!(FourCC::from(0x6d6f6f76), FourCC::new(b"moov"));
    assert_eq!(FourCC::new(b"moov").to_u32(), 0x6d6f6f76);
    assert_eq!(FourCC::new(b"\x00\x01ab").to_string(), "..ab");
}
