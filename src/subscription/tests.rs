use super::*;
use assert_call::{call, CallRecorder};
use std::cell::Cell;

fn on_unsubscribe(rc: Rc<Cell<i32>>) {
    call!("{}", rc.get());
}

#[test]
fn from_fn_calls_on_drop() {
    let mut cr = CallRecorder::new();
    {
        let _s = Subscription::from_fn(|| call!("drop"));
    }
    cr.verify("drop");
}

#[test]
fn from_rc_fn_calls_on_drop() {
    let mut cr = CallRecorder::new();
    let rc = Rc::new(Cell::new(7));
    {
        let _s = Subscription::from_rc_fn(rc.clone(), on_unsubscribe);
    }
    cr.verify("7");
}

#[test]
fn dispose_runs_once() {
    let mut cr = CallRecorder::new();
    let s = Subscription::from_fn(|| call!("dispose"));
    assert!(!s.is_empty());
    s.dispose();
    cr.verify("dispose");
}

#[test]
fn empty_does_nothing() {
    let mut cr = CallRecorder::new();
    let s = Subscription::empty();
    assert!(s.is_empty());
    drop(s);
    drop(Subscription::default());
    cr.verify(());
}
