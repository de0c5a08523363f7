use std::cell::RefCell;
use std::rc::Rc;

use gb_core::core::intf::{INTFlag, Intf};
use gb_core::core::memory::Memory;
use gb_core::core::timer::Timer;

fn timer() -> (Timer, Rc<RefCell<Intf>>) {
    let intf = Rc::new(RefCell::new(Intf::power_up()));
    (Timer::power_up(intf.clone()), intf)
}

#[test]
fn test_div_counts_every_256_cycles() {
    let (mut t, _) = timer();
    t.next(255);
    assert_eq!(t.get(0xff04), 0x00);
    t.next(1);
    assert_eq!(t.get(0xff04), 0x01);
    t.next(256 * 0x100);
    assert_eq!(t.get(0xff04), 0x01);
    t.set(0xff04, 0x77);
    assert_eq!(t.counter(), 0x0000);
}

#[test]
fn test_tima_4096hz() {
    let (mut t, intf) = timer();
    t.set(0xff07, 0x04);
    t.next(1023);
    assert_eq!(t.get(0xff05), 0x00);
    t.next(1);
    assert_eq!(t.get(0xff05), 0x01);

    t.set(0xff06, 0x80);
    t.set(0xff05, 0xff);
    t.next(1024);
    assert_eq!(t.get(0xff05), 0x80);
    assert_eq!(intf.borrow().pending(), INTFlag::Timer.mask());
}

#[test]
fn test_disabled_timer_only_moves_div() {
    let (mut t, intf) = timer();
    t.set(0xff07, 0x03);
    t.next(4096);
    assert_eq!(t.get(0xff05), 0x00);
    assert_eq!(t.get(0xff04), 0x10);
    assert_eq!(intf.borrow().pending(), 0x00);
}

#[test]
fn test_several_overflows_in_one_step() {
    let (mut t, intf) = timer();
    t.set(0xff06, 0xfe);
    t.set(0xff05, 0xfe);
    t.set(0xff07, 0x05);
    // 周期16，共4次递增: fe -> ff -> fe -> ff -> fe
    t.next(64);
    assert_eq!(t.get(0xff05), 0xfe);
    assert_eq!(intf.borrow().pending(), INTFlag::Timer.mask());
}
