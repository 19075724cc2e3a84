use std::{cell::RefCell, rc::Rc};

use assert_call::{call, CallRecorder};

use crate::{batch, core::Runtime, watch, Cleanup, Error, Signal, State, Subscription};

#[test]
fn runs_immediately_and_on_change() {
    let _rt = Runtime::new();
    let mut cr = CallRecorder::new();
    let s = State::new(10);
    let s0 = s.clone();
    let e = watch(move |sc| call!("{}", s0.get(sc))).unwrap();
    cr.verify("10");

    s.set(20).unwrap();
    cr.verify("20");

    drop(e);
    s.set(30).unwrap();
    cr.verify(());
}

#[test]
fn runs_immediately_inside_batch() {
    let _rt = Runtime::new();
    let mut cr = CallRecorder::new();
    let s = State::new(1);
    let e = batch(|| {
        let s0 = s.clone();
        let e = watch(move |sc| call!("{}", s0.get(sc))).unwrap();
        cr.verify("1");
        s.set(2).unwrap();
        cr.verify(());
        e
    })
    .unwrap();
    cr.verify("2");
    drop(e);
}

#[test]
fn diamond_fires_once() {
    let _rt = Runtime::new();
    let mut cr = CallRecorder::new();
    let a = State::new(1);
    let b = a.to_signal().map(|a| a + 1);
    let c = a.to_signal().map(|a| a * 2);
    let d = Signal::new(move |sc| Ok(b.get(sc)? + c.get(sc)?));
    let _e = watch(move |sc| -> Result<(), Error> {
        call!("{}", d.get(sc)?);
        Ok(())
    })
    .unwrap();
    cr.verify("4");

    a.set(2).unwrap();
    cr.verify("7");
}

#[test]
fn constant_intermediates_do_not_fire() {
    let _rt = Runtime::new();
    let mut cr = CallRecorder::new();
    let a = State::new(1);
    let b = a.to_signal().map(|_| 5);
    let c = a.to_signal().map(|_| 6);
    let d = Signal::new(move |sc| Ok(b.get(sc)? + c.get(sc)?));
    let _e = watch(move |sc| -> Result<(), Error> {
        call!("{}", d.get(sc)?);
        Ok(())
    })
    .unwrap();
    cr.verify("11");

    a.set(2).unwrap();
    a.set(3).unwrap();
    cr.verify(());
}

#[test]
fn batch_delivers_settled_values_once() {
    let _rt = Runtime::new();
    let mut cr = CallRecorder::new();
    let a = State::new(1);
    let b = State::new(10);
    let _e = watch({
        let a = a.clone();
        let b = b.clone();
        move |sc| call!("{}", a.get(sc) + b.get(sc))
    })
    .unwrap();
    cr.verify("11");

    batch(|| {
        a.set(2).unwrap();
        b.set(20).unwrap();
        a.set(3).unwrap();
    })
    .unwrap();
    cr.verify("23");
}

#[test]
fn cleanup_runs_before_next_run_and_on_dispose() {
    let _rt = Runtime::new();
    let mut cr = CallRecorder::new();
    let s = State::new(1);
    let s0 = s.clone();
    let e = watch(move |sc| {
        let value = s0.get(sc);
        call!("run {value}");
        Cleanup::new(move || call!("cleanup {value}"))
    })
    .unwrap();
    cr.verify("run 1");

    s.set(2).unwrap();
    cr.verify(["cleanup 1", "run 2"]);

    e.dispose();
    cr.verify("cleanup 2");

    s.set(3).unwrap();
    cr.verify(());
}

#[test]
fn cleanup_writes_are_batched() {
    let _rt = Runtime::new();
    let mut cr = CallRecorder::new();
    let trigger = State::new(0);
    let a = State::new(0);
    let b = State::new(0);
    let _watcher = watch({
        let a = a.clone();
        let b = b.clone();
        move |sc| call!("{} {}", a.get(sc), b.get(sc))
    })
    .unwrap();
    cr.verify("0 0");

    let e = watch({
        let trigger = trigger.clone();
        let a = a.clone();
        let b = b.clone();
        move |sc| {
            trigger.get(sc);
            let a = a.clone();
            let b = b.clone();
            Cleanup::new(move || {
                a.set(1).unwrap();
                b.set(1).unwrap();
            })
        }
    })
    .unwrap();
    cr.verify(());

    drop(e);
    cr.verify("1 1");
}

#[test]
fn stale_branch_is_dropped() {
    let _rt = Runtime::new();
    let mut cr = CallRecorder::new();
    let cond = State::new(true);
    let a = State::new(1);
    let b = State::new(2);
    let _e = watch({
        let cond = cond.clone();
        let a = a.clone();
        let b = b.clone();
        move |sc| {
            let value = if cond.get(sc) { a.get(sc) } else { b.get(sc) };
            call!("{value}");
        }
    })
    .unwrap();
    cr.verify("1");

    cond.set(false).unwrap();
    cr.verify("2");

    a.set(10).unwrap();
    cr.verify(());
    assert_eq!(a.to_signal().dependent_count(), 0);

    b.set(20).unwrap();
    cr.verify("20");
}

#[test]
fn first_run_failure_subscribes_nothing() {
    let _rt = Runtime::new();
    let mut cr = CallRecorder::new();
    let s = State::new(1);
    let s0 = s.clone();
    let e = watch(move |sc| -> Result<(), Error> {
        call!("run");
        s0.get(sc);
        Err(Error::thrown("fail"))
    })
    .unwrap_err();
    assert_eq!(e.downcast_ref::<&str>(), Some(&"fail"));
    cr.verify("run");
    assert_eq!(s.to_signal().dependent_count(), 0);

    s.set(2).unwrap();
    cr.verify(());
}

#[test]
fn later_failure_keeps_subscription() {
    let _rt = Runtime::new();
    let mut cr = CallRecorder::new();
    let s = State::new(1);
    let s0 = s.clone();
    let _e = watch(move |sc| {
        let value = s0.get(sc);
        call!("{value}");
        if value == 2 {
            Err(Error::thrown(value))
        } else {
            Ok(())
        }
    })
    .unwrap();
    cr.verify("1");

    let e = s.set(2).unwrap_err();
    assert_eq!(e.downcast_ref::<i32>(), Some(&2));
    cr.verify("2");

    s.set(3).unwrap();
    cr.verify("3");
}

#[test]
fn disposed_effect_is_inert() {
    let _rt = Runtime::new();
    let mut cr = CallRecorder::new();
    let s = State::new(1);
    let s0 = s.clone();
    let e = watch(move |sc| {
        s0.get(sc);
        Cleanup::new(|| call!("cleanup"))
    })
    .unwrap();
    e.dispose();
    cr.verify("cleanup");
    assert_eq!(s.to_signal().dependent_count(), 0);

    s.set(2).unwrap();
    cr.verify(());
}

#[test]
fn dispose_during_run() {
    let _rt = Runtime::new();
    let mut cr = CallRecorder::new();
    let s = State::new(1);
    let slot: Rc<RefCell<Option<Subscription>>> = Rc::new(RefCell::new(None));
    let e = watch({
        let s = s.clone();
        let slot = slot.clone();
        move |sc| {
            let value = s.get(sc);
            call!("run {value}");
            if value == 2 {
                let e = slot.borrow_mut().take();
                drop(e);
            }
            Cleanup::new(move || call!("cleanup {value}"))
        }
    })
    .unwrap();
    *slot.borrow_mut() = Some(e);
    cr.verify("run 1");

    s.set(2).unwrap();
    cr.verify(["cleanup 1", "run 2", "cleanup 2"]);
    assert_eq!(s.to_signal().dependent_count(), 0);

    s.set(3).unwrap();
    cr.verify(());
}

#[test]
fn write_inside_effect_reruns_after_current_run() {
    let _rt = Runtime::new();
    let mut cr = CallRecorder::new();
    let s = State::new(0);
    let s0 = s.clone();
    let _e = watch(move |sc| {
        let value = s0.get(sc);
        call!("{value}");
        if value < 3 {
            s0.set(value + 1)
        } else {
            Ok(())
        }
    })
    .unwrap();
    cr.verify(["0", "1", "2", "3"]);
}

#[test]
fn result_of_cleanup_is_accepted() {
    let _rt = Runtime::new();
    let mut cr = CallRecorder::new();
    let s = State::new(1);
    let s0 = s.clone();
    let e = watch(move |sc| -> Result<Option<Cleanup>, Error> {
        let value = s0.get(sc);
        Ok((value > 1).then(|| Cleanup::new(move || call!("cleanup {value}"))))
    })
    .unwrap();
    s.set(2).unwrap();
    cr.verify(());
    drop(e);
    cr.verify("cleanup 2");
}
