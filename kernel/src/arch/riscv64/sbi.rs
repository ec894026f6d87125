use crate::console::ConsoleSink;

/// 通用的 SBI 调用函数。
///
/// # Arguments
/// * `eid`: SBI Extension ID (放入 x17)
/// * `fid`: SBI Function ID (放入 x16)
/// * `args`: 最多6个参数，依次放入 x10-x15。
#[inline(always)]
pub fn sbi_call(eid: usize, fid: usize, args: [usize; 6]) -> (isize, isize) {
    let mut error_code: isize;
    let mut result_value: isize;

    unsafe {
        core::arch::asm!(
            "ecall",
            in("x17") eid,
            in("x16") fid,
            inlateout("x10") args[0] => error_code,
            inlateout("x11") args[1] => result_value,
            in("x12") args[2],
            in("x13") args[3],
            in("x14") args[4],
            in("x15") args[5],
        )
    }
    (result_value, error_code)
}

pub fn console_putchar(c: u8) {
    sbi_call(0x01, 0, [c as usize, 0, 0, 0, 0, 0]);
}

/// Legacy SBI console, usable before any UART driver is up.
pub struct SbiConsole;

impl ConsoleSink for SbiConsole {
    fn write_str(&self, s: &str) {
        for c in s.bytes() {
            console_putchar(c);
        }
    }
}

const SBI_EXT_TIME: usize = 0x5449_4D45;

/// Program the next timer interrupt at absolute time `stime_value`.
pub fn set_timer(stime_value: u64) -> isize {
    let (_, error) = sbi_call(SBI_EXT_TIME, 0, [stime_value as usize, 0, 0, 0, 0, 0]);
    error
}
