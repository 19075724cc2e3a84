use super::*;

#[derive(Debug, PartialEq)]
struct Sentinel(u32);

#[test]
fn cyclic_display() {
    assert_eq!(Error::Cyclic.to_string(), "detect cyclic dependency");
    assert!(Error::Cyclic.is_cyclic());
}

#[test]
fn thrown_keeps_value() {
    let e = Error::thrown(Sentinel(7));
    assert!(!e.is_cyclic());
    assert_eq!(e.downcast_ref::<Sentinel>(), Some(&Sentinel(7)));
    assert_eq!(e.downcast_ref::<u32>(), None);
}

#[test]
fn thrown_non_error_value() {
    let e = Error::thrown(42_i64);
    assert_eq!(e.to_string(), "42");
    assert_eq!(e.downcast_ref::<i64>(), Some(&42));
}

#[test]
fn clone_is_same_value() {
    let t = Thrown::new("boom");
    let t2 = t.clone();
    assert!(t.ptr_eq(&t2));
    assert!(!t.ptr_eq(&Thrown::new("boom")));
}
