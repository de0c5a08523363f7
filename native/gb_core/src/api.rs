use std::slice;

use crate::core::config::MachineConfig;
use crate::core::system_clock::SystemClock;
use crate::tools::logger;

#[no_mangle]
pub extern "C" fn gb_core_init_logger() {
    logger::init_logger();
}

/// 用ROM数据创建一台机器，ROM无效时返回空指针
#[no_mangle]
pub extern "C" fn gb_core_create(rom: *const u8, len: usize) -> *mut SystemClock {
    if rom.is_null() {
        log::error!("Create gameboy failed: rom is null");
        return std::ptr::null_mut();
    }
    let data = unsafe { slice::from_raw_parts(rom, len) }.to_vec();
    match SystemClock::power_up(data, MachineConfig::default()) {
        Ok(gb) => Box::into_raw(Box::new(gb)),
        Err(e) => {
            log::error!("Create gameboy failed: {}", e);
            std::ptr::null_mut()
        }
    }
}

/// 执行一帧，返回是否产生了新的一帧
#[no_mangle]
pub extern "C" fn gb_core_run_frame(gb: *mut SystemClock) -> bool {
    if gb.is_null() {
        return false;
    }
    let gb = unsafe { &mut *gb };
    gb.run_frame()
}

#[no_mangle]
pub extern "C" fn gb_core_take_frame(gb: *mut SystemClock) -> bool {
    if gb.is_null() {
        return false;
    }
    let gb = unsafe { &mut *gb };
    gb.take_frame()
}

/// 最近一帧的颜色编号(160*144)，指针在下一次执行之前有效
#[no_mangle]
pub extern "C" fn gb_core_framebuffer(gb: *const SystemClock) -> *const u8 {
    if gb.is_null() {
        return std::ptr::null();
    }
    let gb = unsafe { &*gb };
    let ptr = gb.framebuffer().as_ptr();
    ptr
}

/// 把最近一帧的灰度编号复制到out，返回复制的字节数
#[no_mangle]
pub extern "C" fn gb_core_copy_framebuffer(gb: *const SystemClock, out: *mut u8, len: usize) -> usize {
    if gb.is_null() || out.is_null() {
        return 0;
    }
    let gb = unsafe { &*gb };
    let out = unsafe { slice::from_raw_parts_mut(out, len) };
    let shades = gb.shades();
    let n = shades.len().min(out.len());
    out[..n].copy_from_slice(&shades[..n]);
    n
}

#[no_mangle]
pub extern "C" fn gb_core_press_button(gb: *mut SystemClock, btn: u8) {
    if gb.is_null() {
        return;
    }
    let gb = unsafe { &mut *gb };
    gb.press_button(btn);
}

#[no_mangle]
pub extern "C" fn gb_core_release_button(gb: *mut SystemClock, btn: u8) {
    if gb.is_null() {
        return;
    }
    let gb = unsafe { &mut *gb };
    gb.release_button(btn);
}

#[no_mangle]
pub extern "C" fn gb_core_destroy(gb: *mut SystemClock) {
    if gb.is_null() {
        return;
    }
    // 释放由gb_core_create创建的对象
    let _ = unsafe { Box::from_raw(gb) };
}
