use std::cell::RefCell;
use std::rc::Rc;

use crate::core::convention::HardwareMode;
use crate::core::intf::INTFlag;
use crate::core::memory::{Bus, Memory};
use crate::core::register::{Flag, Register};

// 每条指令所花费的机器周期，1机器周期 = 4时钟周期
// 条件跳转类指令记录的是条件不满足时的周期，满足时另加: JR/JP +1, CALL/RET +3
// 0表示非法指令，0xcb前缀指令的周期另行计算
const OP_CYCLES: [u32; 256] = [
//  0  1  2  3  4  5  6  7  8  9  a  b  c  d  e  f
    1, 3, 2, 2, 1, 1, 2, 1, 5, 2, 2, 2, 1, 1, 2, 1, // 0
    1, 3, 2, 2, 1, 1, 2, 1, 3, 2, 2, 2, 1, 1, 2, 1, // 1
    2, 3, 2, 2, 1, 1, 2, 1, 2, 2, 2, 2, 1, 1, 2, 1, // 2
    2, 3, 2, 2, 3, 3, 3, 1, 2, 2, 2, 2, 1, 1, 2, 1, // 3
    1, 1, 1, 1, 1, 1, 2, 1, 1, 1, 1, 1, 1, 1, 2, 1, // 4
    1, 1, 1, 1, 1, 1, 2, 1, 1, 1, 1, 1, 1, 1, 2, 1, // 5
    1, 1, 1, 1, 1, 1, 2, 1, 1, 1, 1, 1, 1, 1, 2, 1, // 6
    2, 2, 2, 2, 2, 2, 1, 2, 1, 1, 1, 1, 1, 1, 2, 1, // 7
    1, 1, 1, 1, 1, 1, 2, 1, 1, 1, 1, 1, 1, 1, 2, 1, // 8
    1, 1, 1, 1, 1, 1, 2, 1, 1, 1, 1, 1, 1, 1, 2, 1, // 9
    1, 1, 1, 1, 1, 1, 2, 1, 1, 1, 1, 1, 1, 1, 2, 1, // a
    1, 1, 1, 1, 1, 1, 2, 1, 1, 1, 1, 1, 1, 1, 2, 1, // b
    2, 3, 3, 4, 3, 4, 2, 4, 2, 4, 3, 0, 3, 6, 2, 4, // c
    2, 3, 3, 0, 3, 4, 2, 4, 2, 4, 3, 0, 3, 0, 2, 4, // d
    3, 3, 2, 0, 0, 4, 2, 4, 4, 1, 4, 0, 0, 0, 2, 4, // e
    3, 3, 2, 1, 0, 4, 2, 4, 3, 2, 4, 1, 0, 0, 2, 4, // f
];

/// 响应一次中断所花费的机器周期
const INTERRUPT_CYCLES: u32 = 5;

/// 执行一步的结果
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Step {
    /// 执行了一条指令或响应了一次中断，花费的机器周期，0表示遇到了非法指令
    Cycles(u32),
    /// CPU处于HALT状态，没有执行任何指令
    Halted,
}

pub struct Cpu {
    pub reg: Register,
    pub mem: Rc<RefCell<dyn Bus>>,
    pub mode: HardwareMode,
    pub halted: bool,
    /// IME，是否允许响应中断
    pub ime: bool,
    /// EI执行后等待生效，下一条指令执行完毕后才会设置IME
    pub ime_pending: bool,
    /// 最近一次切换速度的STOP指令地址
    pub stop_pc: Option<u16>,
    /// 最近一步响应的中断
    pub serviced: Option<INTFlag>,
}

impl Cpu {
    #[inline(always)]
    fn get_mem(&self, a: u16) -> u8 {
        self.mem.borrow().get(a)
    }

    #[inline(always)]
    fn get_mem_word(&self, a: u16) -> u16 {
        self.mem.borrow().get_word(a)
    }

    #[inline(always)]
    fn set_mem(&mut self, a: u16, v: u8) {
        self.mem.borrow_mut().set(a, v);
    }

    #[inline(always)]
    fn set_mem_word(&mut self, a: u16, v: u16) {
        self.mem.borrow_mut().set_word(a, v);
    }

    // 根据a+b的计算结果r，判断第3位是否向第4位进位（减法时表示借位）
    #[inline(always)]
    fn is_half_carry(a: u8, b: u8, r: u8) -> bool {
        // 不考虑进位时第4位等于a^b，和r的第4位不同则说明有进位
        (a ^ b ^ r) & 0x10 != 0
    }

    // 取出8位立即数
    fn imm(&mut self) -> u8 {
        let v = self.get_mem(self.reg.pc);
        self.reg.pc = self.reg.pc.wrapping_add(1);
        v
    }

    // 取出16位立即数
    fn imm_word(&mut self) -> u16 {
        let v = self.get_mem_word(self.reg.pc);
        self.reg.pc = self.reg.pc.wrapping_add(2);
        v
    }

    // 将16位数据放入栈顶，先写高8位再写低8位
    fn stack_push(&mut self, v: u16) {
        self.reg.sp = self.reg.sp.wrapping_sub(1);
        self.set_mem(self.reg.sp, (v >> 8) as u8);
        self.reg.sp = self.reg.sp.wrapping_sub(1);
        self.set_mem(self.reg.sp, v as u8);
    }

    // 弹出栈顶的16位数据
    fn stack_pop(&mut self) -> u16 {
        let v = self.get_mem_word(self.reg.sp);
        self.reg.sp = self.reg.sp.wrapping_add(2);
        v
    }

    /// 按照指令编码中的3位寄存器编号读取: B, C, D, E, H, L, (HL), A
    fn get_r8(&self, i: u8) -> u8 {
        match i & 0x07 {
            0 => self.reg.b,
            1 => self.reg.c,
            2 => self.reg.d,
            3 => self.reg.e,
            4 => self.reg.h,
            5 => self.reg.l,
            6 => self.get_mem(self.reg.get_hl()),
            _ => self.reg.a,
        }
    }

    fn set_r8(&mut self, i: u8, v: u8) {
        match i & 0x07 {
            0 => self.reg.b = v,
            1 => self.reg.c = v,
            2 => self.reg.d = v,
            3 => self.reg.e = v,
            4 => self.reg.h = v,
            5 => self.reg.l = v,
            6 => self.set_mem(self.reg.get_hl(), v),
            _ => self.reg.a = v,
        }
    }

    /// 按照指令编码中的2位寄存器编号读取: BC, DE, HL, SP
    fn get_r16(&self, i: u8) -> u16 {
        match i & 0x03 {
            0 => self.reg.get_bc(),
            1 => self.reg.get_de(),
            2 => self.reg.get_hl(),
            _ => self.reg.sp,
        }
    }

    fn set_r16(&mut self, i: u8, v: u16) {
        match i & 0x03 {
            0 => self.reg.set_bc(v),
            1 => self.reg.set_de(v),
            2 => self.reg.set_hl(v),
            _ => self.reg.sp = v,
        }
    }

    /// PUSH/POP使用的寄存器编号: BC, DE, HL, AF
    fn get_r16_stack(&self, i: u8) -> u16 {
        match i & 0x03 {
            3 => self.reg.get_af(),
            n => self.get_r16(n),
        }
    }

    fn set_r16_stack(&mut self, i: u8, v: u16) {
        match i & 0x03 {
            3 => self.reg.set_af(v),
            n => self.set_r16(n, v),
        }
    }

    /// 跳转条件: NZ, Z, NC, C
    fn condition(&self, cc: u8) -> bool {
        match cc & 0x03 {
            0 => !self.reg.get_flag(Flag::Z),
            1 => self.reg.get_flag(Flag::Z),
            2 => !self.reg.get_flag(Flag::C),
            _ => self.reg.get_flag(Flag::C),
        }
    }
}

impl Cpu {
    // ADD A,v
    // Z - 计算结果为0则置1
    // N - 置0
    // H - 第3位进位时置1
    // C - 第7位进位时置1
    fn add(&mut self, v: u8) {
        let o = self.reg.a;
        let (r, carry) = o.overflowing_add(v);
        self.reg.set_flag(Flag::Z, r == 0x00);
        self.reg.set_flag(Flag::N, false);
        self.reg.set_flag(Flag::H, Self::is_half_carry(o, v, r));
        self.reg.set_flag(Flag::C, carry);
        self.reg.a = r;
    }

    // ADC A,v  带进位的加法
    fn adc(&mut self, v: u8) {
        let o = self.reg.a;
        let c = u8::from(self.reg.get_flag(Flag::C));
        let r = o.wrapping_add(v).wrapping_add(c);
        self.reg.set_flag(Flag::Z, r == 0x00);
        self.reg.set_flag(Flag::N, false);
        self.reg.set_flag(Flag::H, (o & 0x0f) + (v & 0x0f) + c > 0x0f);
        self.reg.set_flag(Flag::C, u16::from(o) + u16::from(v) + u16::from(c) > 0xff);
        self.reg.a = r;
    }

    // SUB A,v
    // Z - 计算结果为0则置1
    // N - 置1
    // H - 第4位借位时置1
    // C - 发生借位时置1
    fn sub(&mut self, v: u8) {
        let o = self.reg.a;
        let (r, borrow) = o.overflowing_sub(v);
        self.reg.set_flag(Flag::Z, r == 0x00);
        self.reg.set_flag(Flag::N, true);
        self.reg.set_flag(Flag::H, Self::is_half_carry(o, v, r));
        self.reg.set_flag(Flag::C, borrow);
        self.reg.a = r;
    }

    // SBC A,v  带借位的减法
    fn sbc(&mut self, v: u8) {
        let o = self.reg.a;
        let c = u8::from(self.reg.get_flag(Flag::C));
        let r = o.wrapping_sub(v).wrapping_sub(c);
        self.reg.set_flag(Flag::Z, r == 0x00);
        self.reg.set_flag(Flag::N, true);
        self.reg.set_flag(Flag::H, (o & 0x0f) < (v & 0x0f) + c);
        self.reg.set_flag(Flag::C, u16::from(o) < u16::from(v) + u16::from(c));
        self.reg.a = r;
    }

    // AND A,v: Z由结果决定，N=0，H=1，C=0
    fn and(&mut self, v: u8) {
        self.reg.a &= v;
        self.reg.set_flag(Flag::Z, self.reg.a == 0x00);
        self.reg.set_flag(Flag::N, false);
        self.reg.set_flag(Flag::H, true);
        self.reg.set_flag(Flag::C, false);
    }

    // OR A,v: Z由结果决定，其余置0
    fn or(&mut self, v: u8) {
        self.reg.a |= v;
        self.reg.set_f(if self.reg.a == 0x00 { Flag::Z.og() } else { 0x00 });
    }

    // XOR A,v: Z由结果决定，其余置0
    fn xor(&mut self, v: u8) {
        self.reg.a ^= v;
        self.reg.set_f(if self.reg.a == 0x00 { Flag::Z.og() } else { 0x00 });
    }

    // CP A,v  等同于SUB，但是丢弃计算结果
    fn cp(&mut self, v: u8) {
        let a = self.reg.a;
        self.sub(v);
        self.reg.a = a;
    }

    /// 指令编码第3~5位选择的算术逻辑运算: ADD, ADC, SUB, SBC, AND, XOR, OR, CP
    fn alu(&mut self, op: u8, v: u8) {
        match op & 0x07 {
            0 => self.add(v),
            1 => self.adc(v),
            2 => self.sub(v),
            3 => self.sbc(v),
            4 => self.and(v),
            5 => self.xor(v),
            6 => self.or(v),
            _ => self.cp(v),
        }
    }

    // INC r8
    // Z - 计算结果为0则置1
    // N - 置0
    // H - 第3位进位时置1
    // C - 保持不变
    fn inc(&mut self, v: u8) -> u8 {
        let r = v.wrapping_add(1);
        self.reg.set_flag(Flag::Z, r == 0x00);
        self.reg.set_flag(Flag::N, false);
        self.reg.set_flag(Flag::H, v & 0x0f == 0x0f);
        r
    }

    // DEC r8
    // Z - 计算结果为0则置1
    // N - 置1
    // H - 第4位借位时置1
    // C - 保持不变
    fn dec(&mut self, v: u8) -> u8 {
        let r = v.wrapping_sub(1);
        self.reg.set_flag(Flag::Z, r == 0x00);
        self.reg.set_flag(Flag::N, true);
        self.reg.set_flag(Flag::H, v & 0x0f == 0x00);
        r
    }

    // ADD HL,v
    // Z - 保持不变
    // N - 置0
    // H - 第11位进位时置1
    // C - 第15位进位时置1
    fn add_hl(&mut self, v: u16) {
        let o = self.reg.get_hl();
        let (r, carry) = o.overflowing_add(v);
        self.reg.set_flag(Flag::N, false);
        self.reg.set_flag(Flag::H, (o & 0x0fff) + (v & 0x0fff) > 0x0fff);
        self.reg.set_flag(Flag::C, carry);
        self.reg.set_hl(r);
    }

    // SP加上有符号的8位立即数，返回计算结果，用于ADD SP,r8和LD HL,SP+r8
    // Z, N - 置0
    // H, C - 按低8位的无符号加法计算第3位和第7位的进位
    fn add_sp(&mut self) -> u16 {
        let o = self.reg.sp;
        let d = i16::from(self.imm() as i8) as u16;
        let r = o.wrapping_add(d);
        let carries = o ^ d ^ r;
        self.reg.set_flag(Flag::Z, false);
        self.reg.set_flag(Flag::N, false);
        self.reg.set_flag(Flag::H, carries & 0x0010 != 0);
        self.reg.set_flag(Flag::C, carries & 0x0100 != 0);
        r
    }

    // DAA  根据上一次加减法的结果，把A修正为BCD编码
    // Z - 计算结果为0则置1
    // N - 保持不变
    // H - 置0
    // C - 高4位需要修正时置1
    fn daa(&mut self) {
        let mut a = self.reg.a;
        let mut adjust = if self.reg.get_flag(Flag::C) { 0x60 } else { 0x00 };
        if self.reg.get_flag(Flag::H) {
            adjust |= 0x06;
        }
        if !self.reg.get_flag(Flag::N) {
            if a & 0x0f > 0x09 {
                adjust |= 0x06;
            }
            if a > 0x99 {
                adjust |= 0x60;
            }
            a = a.wrapping_add(adjust);
        } else {
            a = a.wrapping_sub(adjust);
        }
        self.reg.set_flag(Flag::Z, a == 0x00);
        self.reg.set_flag(Flag::H, false);
        self.reg.set_flag(Flag::C, adjust >= 0x60);
        self.reg.a = a;
    }

    /// 移位类指令统一的标志位: Z由结果决定，N和H置0，C为移出的位
    fn shift_flags(&mut self, r: u8, carry: bool) -> u8 {
        self.reg.set_flag(Flag::Z, r == 0x00);
        self.reg.set_flag(Flag::N, false);
        self.reg.set_flag(Flag::H, false);
        self.reg.set_flag(Flag::C, carry);
        r
    }

    // 循环左移，第7位同时移入C和第0位
    fn rlc(&mut self, v: u8) -> u8 {
        self.shift_flags(v.rotate_left(1), v & 0x80 != 0)
    }

    // 带进位循环左移，C移入第0位，第7位移入C
    fn rl(&mut self, v: u8) -> u8 {
        let c = u8::from(self.reg.get_flag(Flag::C));
        self.shift_flags((v << 1) | c, v & 0x80 != 0)
    }

    // 循环右移，第0位同时移入C和第7位
    fn rrc(&mut self, v: u8) -> u8 {
        self.shift_flags(v.rotate_right(1), v & 0x01 != 0)
    }

    // 带进位循环右移，C移入第7位，第0位移入C
    fn rr(&mut self, v: u8) -> u8 {
        let c = if self.reg.get_flag(Flag::C) { 0x80 } else { 0x00 };
        self.shift_flags((v >> 1) | c, v & 0x01 != 0)
    }

    // 算术左移
    fn sla(&mut self, v: u8) -> u8 {
        self.shift_flags(v << 1, v & 0x80 != 0)
    }

    // 算术右移，第7位保持不变
    fn sra(&mut self, v: u8) -> u8 {
        self.shift_flags((v >> 1) | (v & 0x80), v & 0x01 != 0)
    }

    // 逻辑右移
    fn srl(&mut self, v: u8) -> u8 {
        self.shift_flags(v >> 1, v & 0x01 != 0)
    }

    // 交换高4位和低4位
    fn swap(&mut self, v: u8) -> u8 {
        self.shift_flags(v.rotate_left(4), false)
    }

    // BIT b,v: 第b位为0则Z置1，N置0，H置1，C保持不变
    fn bit(&mut self, v: u8, b: u8) {
        self.reg.set_flag(Flag::Z, v & (1 << b) == 0x00);
        self.reg.set_flag(Flag::N, false);
        self.reg.set_flag(Flag::H, true);
    }

    // 相对跳转，偏移量是有符号8位数
    fn jr(&mut self, n: u8) {
        self.reg.pc = self.reg.pc.wrapping_add(i16::from(n as i8) as u16);
    }

    fn call(&mut self, addr: u16) {
        self.stack_push(self.reg.pc);
        self.reg.pc = addr;
    }

    fn ret(&mut self) {
        self.reg.pc = self.stack_pop();
    }
}

impl Cpu {
    pub fn power_up(mode: HardwareMode, mem: Rc<RefCell<dyn Bus>>) -> Self {
        Self {
            reg: Register::power_up(mode),
            mem,
            mode,
            halted: false,
            ime: false,
            ime_pending: false,
            stop_pc: None,
            serviced: None,
        }
    }

    /// 已请求并且被允许的中断，只有低5位有效
    fn pending_interrupts(&self) -> u8 {
        let mem = self.mem.borrow();
        mem.get(0xffff) & mem.get(0xff0f) & 0x1f
    }

    /// 响应中断：把PC压栈，关闭IME，清除IF中对应的位，跳转到中断处理程序
    fn dispatch(&mut self, flag: INTFlag) -> u32 {
        self.ime = false;
        self.ime_pending = false;
        let intf = self.get_mem(0xff0f);
        self.set_mem(0xff0f, intf & !flag.mask());
        self.stack_push(self.reg.pc);
        self.reg.pc = flag.vector();
        self.serviced = Some(flag);
        INTERRUPT_CYCLES
    }

    /// 执行一步：响应一次中断，或者执行一条指令
    pub fn step(&mut self) -> Step {
        self.serviced = None;
        let pending = self.pending_interrupts();
        if self.halted {
            if pending == 0x00 {
                return Step::Halted;
            }
            // 有中断请求时无论IME如何都会唤醒CPU
            self.halted = false;
        }
        if self.ime {
            if let Some(flag) = INTFlag::highest(pending) {
                return Step::Cycles(self.dispatch(flag));
            }
        }
        let enable = self.ime_pending;
        let cycles = self.ex();
        // EI的效果在下一条指令执行完毕后才生效，期间执行DI会取消
        if enable && self.ime_pending {
            self.ime_pending = false;
            self.ime = true;
        }
        Step::Cycles(cycles)
    }

    // 执行指令，并返回指令所花费的机器周期
    fn ex(&mut self) -> u32 {
        let pc = self.reg.pc;
        let opcode = self.imm();
        // 分支跳转指令所消耗的额外机器周期
        let mut extra_cycles = 0;

        match opcode {
            // NOP
            0x00 => {}
            // LD r16,d16
            0x01 | 0x11 | 0x21 | 0x31 => {
                let v = self.imm_word();
                self.set_r16(opcode >> 4, v);
            }
            // LD (BC),A / LD (DE),A
            0x02 | 0x12 => {
                let a = self.get_r16(opcode >> 4);
                self.set_mem(a, self.reg.a);
            }
            // LD (HL+),A
            0x22 => {
                let a = self.reg.get_hl();
                self.set_mem(a, self.reg.a);
                self.reg.set_hl(a.wrapping_add(1));
            }
            // LD (HL-),A
            0x32 => {
                let a = self.reg.get_hl();
                self.set_mem(a, self.reg.a);
                self.reg.set_hl(a.wrapping_sub(1));
            }
            // LD A,(BC) / LD A,(DE)
            0x0a | 0x1a => self.reg.a = self.get_mem(self.get_r16(opcode >> 4)),
            // LD A,(HL+)
            0x2a => {
                let a = self.reg.get_hl();
                self.reg.a = self.get_mem(a);
                self.reg.set_hl(a.wrapping_add(1));
            }
            // LD A,(HL-)
            0x3a => {
                let a = self.reg.get_hl();
                self.reg.a = self.get_mem(a);
                self.reg.set_hl(a.wrapping_sub(1));
            }
            // INC r16，不影响标志位
            0x03 | 0x13 | 0x23 | 0x33 => {
                let v = self.get_r16(opcode >> 4).wrapping_add(1);
                self.set_r16(opcode >> 4, v);
            }
            // DEC r16，不影响标志位
            0x0b | 0x1b | 0x2b | 0x3b => {
                let v = self.get_r16(opcode >> 4).wrapping_sub(1);
                self.set_r16(opcode >> 4, v);
            }
            // ADD HL,r16
            0x09 | 0x19 | 0x29 | 0x39 => self.add_hl(self.get_r16(opcode >> 4)),
            // INC r8
            0x04 | 0x0c | 0x14 | 0x1c | 0x24 | 0x2c | 0x34 | 0x3c => {
                let v = self.get_r8(opcode >> 3);
                let r = self.inc(v);
                self.set_r8(opcode >> 3, r);
            }
            // DEC r8
            0x05 | 0x0d | 0x15 | 0x1d | 0x25 | 0x2d | 0x35 | 0x3d => {
                let v = self.get_r8(opcode >> 3);
                let r = self.dec(v);
                self.set_r8(opcode >> 3, r);
            }
            // LD r8,d8
            0x06 | 0x0e | 0x16 | 0x1e | 0x26 | 0x2e | 0x36 | 0x3e => {
                let v = self.imm();
                self.set_r8(opcode >> 3, v);
            }
            // RLCA, RRCA, RLA, RRA: 与CB前缀的版本相同，但Z始终置0
            0x07 => {
                self.reg.a = self.rlc(self.reg.a);
                self.reg.set_flag(Flag::Z, false);
            }
            0x0f => {
                self.reg.a = self.rrc(self.reg.a);
                self.reg.set_flag(Flag::Z, false);
            }
            0x17 => {
                self.reg.a = self.rl(self.reg.a);
                self.reg.set_flag(Flag::Z, false);
            }
            0x1f => {
                self.reg.a = self.rr(self.reg.a);
                self.reg.set_flag(Flag::Z, false);
            }
            // LD (a16),SP
            0x08 => {
                let a = self.imm_word();
                self.set_mem_word(a, self.reg.sp);
            }
            // STOP，跳过后面的填充字节
            0x10 => {
                self.imm();
                if self.mem.borrow_mut().switch_speed() {
                    self.stop_pc = Some(pc);
                }
            }
            // JR r8
            0x18 => {
                let n = self.imm();
                self.jr(n);
            }
            // JR cc,r8
            0x20 | 0x28 | 0x30 | 0x38 => {
                let n = self.imm();
                if self.condition(opcode >> 3) {
                    self.jr(n);
                    extra_cycles = 1;
                }
            }
            0x27 => self.daa(),
            // CPL
            0x2f => {
                self.reg.a = !self.reg.a;
                self.reg.set_flag(Flag::N, true);
                self.reg.set_flag(Flag::H, true);
            }
            // SCF
            0x37 => {
                self.reg.set_flag(Flag::N, false);
                self.reg.set_flag(Flag::H, false);
                self.reg.set_flag(Flag::C, true);
            }
            // CCF
            0x3f => {
                self.reg.set_flag(Flag::N, false);
                self.reg.set_flag(Flag::H, false);
                self.reg.set_flag(Flag::C, !self.reg.get_flag(Flag::C));
            }
            // HALT
            0x76 => self.halted = true,
            // LD r8,r8
            0x40..=0x7f => {
                let v = self.get_r8(opcode);
                self.set_r8(opcode >> 3, v);
            }
            // ADD/ADC/SUB/SBC/AND/XOR/OR/CP A,r8
            0x80..=0xbf => {
                let v = self.get_r8(opcode);
                self.alu(opcode >> 3, v);
            }
            // ADD/ADC/SUB/SBC/AND/XOR/OR/CP A,d8
            0xc6 | 0xce | 0xd6 | 0xde | 0xe6 | 0xee | 0xf6 | 0xfe => {
                let v = self.imm();
                self.alu(opcode >> 3, v);
            }
            // RET cc
            0xc0 | 0xc8 | 0xd0 | 0xd8 => {
                if self.condition(opcode >> 3) {
                    self.ret();
                    extra_cycles = 3;
                }
            }
            // POP r16
            0xc1 | 0xd1 | 0xe1 | 0xf1 => {
                let v = self.stack_pop();
                self.set_r16_stack(opcode >> 4, v);
            }
            // PUSH r16
            0xc5 | 0xd5 | 0xe5 | 0xf5 => self.stack_push(self.get_r16_stack(opcode >> 4)),
            // JP cc,a16
            0xc2 | 0xca | 0xd2 | 0xda => {
                let a = self.imm_word();
                if self.condition(opcode >> 3) {
                    self.reg.pc = a;
                    extra_cycles = 1;
                }
            }
            // JP a16
            0xc3 => self.reg.pc = self.imm_word(),
            // JP HL
            0xe9 => self.reg.pc = self.reg.get_hl(),
            // CALL cc,a16
            0xc4 | 0xcc | 0xd4 | 0xdc => {
                let a = self.imm_word();
                if self.condition(opcode >> 3) {
                    self.call(a);
                    extra_cycles = 3;
                }
            }
            // CALL a16
            0xcd => {
                let a = self.imm_word();
                self.call(a);
            }
            // RST，跳转到0x00, 0x08 ... 0x38
            0xc7 | 0xcf | 0xd7 | 0xdf | 0xe7 | 0xef | 0xf7 | 0xff => {
                self.call(u16::from(opcode & 0x38));
            }
            0xc9 => self.ret(),
            // RETI，立即打开IME
            0xd9 => {
                self.ret();
                self.ime = true;
            }
            // 0xcb前缀的扩展指令
            0xcb => return self.ex_cb(),
            // LDH (a8),A
            0xe0 => {
                let a = 0xff00 | u16::from(self.imm());
                self.set_mem(a, self.reg.a);
            }
            // LDH A,(a8)
            0xf0 => {
                let a = 0xff00 | u16::from(self.imm());
                self.reg.a = self.get_mem(a);
            }
            // LD (C),A
            0xe2 => self.set_mem(0xff00 | u16::from(self.reg.c), self.reg.a),
            // LD A,(C)
            0xf2 => self.reg.a = self.get_mem(0xff00 | u16::from(self.reg.c)),
            // LD (a16),A
            0xea => {
                let a = self.imm_word();
                self.set_mem(a, self.reg.a);
            }
            // LD A,(a16)
            0xfa => {
                let a = self.imm_word();
                self.reg.a = self.get_mem(a);
            }
            // ADD SP,r8
            0xe8 => self.reg.sp = self.add_sp(),
            // LD HL,SP+r8
            0xf8 => {
                let v = self.add_sp();
                self.reg.set_hl(v);
            }
            // LD SP,HL
            0xf9 => self.reg.sp = self.reg.get_hl(),
            // DI，同时取消还未生效的EI
            0xf3 => {
                self.ime = false;
                self.ime_pending = false;
            }
            // EI
            0xfb => self.ime_pending = true,
            // 0xd3, 0xdb, 0xdd, 0xe3, 0xe4, 0xeb, 0xec, 0xed, 0xf4, 0xfc, 0xfd
            _ => {
                log::warn!("Illegal opcode {:#04x} at {:#06x}", opcode, pc);
                return 0;
            }
        }

        OP_CYCLES[opcode as usize] + extra_cycles
    }

    // 执行0xcb前缀的扩展指令
    // 第6~7位: 0表示移位类指令，1: BIT，2: RES，3: SET
    // 第3~5位: 移位类指令的种类，或BIT/RES/SET操作的位
    // 第0~2位: 操作数所在的寄存器
    fn ex_cb(&mut self) -> u32 {
        let opcode = self.imm();
        let i = opcode & 0x07;
        let b = (opcode >> 3) & 0x07;
        let v = self.get_r8(i);
        match opcode >> 6 {
            0 => {
                let r = match b {
                    0 => self.rlc(v),
                    1 => self.rrc(v),
                    2 => self.rl(v),
                    3 => self.rr(v),
                    4 => self.sla(v),
                    5 => self.sra(v),
                    6 => self.swap(v),
                    _ => self.srl(v),
                };
                self.set_r8(i, r);
            }
            1 => self.bit(v, b),
            2 => self.set_r8(i, v & !(1 << b)),
            _ => self.set_r8(i, v | (1 << b)),
        }
        // 操作(HL)需要额外的内存访问
        match (i, opcode >> 6) {
            (6, 1) => 3,
            (6, _) => 4,
            _ => 2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 64KB的平坦内存，0xff0f和0xffff作为普通字节
    struct FlatBus {
        ram: Vec<u8>,
        armed: bool,
    }

    impl Memory for FlatBus {
        fn get(&self, a: u16) -> u8 {
            self.ram[a as usize]
        }

        fn set(&mut self, a: u16, v: u8) {
            self.ram[a as usize] = v;
        }
    }

    impl Bus for FlatBus {
        fn switch_speed(&mut self) -> bool {
            std::mem::replace(&mut self.armed, false)
        }
    }

    fn cpu(program: &[u8]) -> (Cpu, Rc<RefCell<FlatBus>>) {
        let bus = Rc::new(RefCell::new(FlatBus {
            ram: vec![0; 0x10000],
            armed: false,
        }));
        bus.borrow_mut().ram[0x0100..0x0100 + program.len()].copy_from_slice(program);
        let mem: Rc<RefCell<dyn Bus>> = bus.clone();
        (Cpu::power_up(HardwareMode::Dmg, mem), bus)
    }

    #[test]
    fn test_dec_keeps_carry() {
        // DEC B
        let (mut c, _) = cpu(&[0x05, 0x05]);
        c.reg.b = 1;
        c.reg.set_flag(Flag::C, true);
        assert_eq!(c.step(), Step::Cycles(1));
        assert_eq!(c.reg.b, 0);
        assert!(c.reg.get_flag(Flag::Z));
        assert!(c.reg.get_flag(Flag::N));
        assert!(c.reg.get_flag(Flag::C));
        c.reg.set_flag(Flag::C, false);
        c.step();
        assert_eq!(c.reg.b, 0xff);
        assert!(c.reg.get_flag(Flag::H));
        assert!(!c.reg.get_flag(Flag::C));
    }

    #[test]
    fn test_add_overflow_flags() {
        // ADD A,0xff; ADD A,0x01
        let (mut c, _) = cpu(&[0xc6, 0xff, 0xc6, 0x01]);
        c.reg.a = 0x00;
        c.step();
        assert_eq!(c.reg.a, 0xff);
        c.step();
        assert_eq!(c.reg.a, 0x00);
        assert!(c.reg.get_flag(Flag::Z));
        assert!(!c.reg.get_flag(Flag::N));
        assert!(c.reg.get_flag(Flag::H));
        assert!(c.reg.get_flag(Flag::C));
    }

    #[test]
    fn test_cp_keeps_accumulator() {
        // CP 0x42
        let (mut c, _) = cpu(&[0xfe, 0x42]);
        c.reg.a = 0x42;
        c.step();
        assert_eq!(c.reg.a, 0x42);
        assert!(c.reg.get_flag(Flag::Z));
        assert!(c.reg.get_flag(Flag::N));
    }

    #[test]
    fn test_add_hl_keeps_zero() {
        // ADD HL,BC
        let (mut c, _) = cpu(&[0x09]);
        c.reg.set_hl(0x0fff);
        c.reg.set_bc(0x0001);
        c.reg.set_flag(Flag::Z, true);
        assert_eq!(c.step(), Step::Cycles(2));
        assert_eq!(c.reg.get_hl(), 0x1000);
        assert!(c.reg.get_flag(Flag::Z));
        assert!(c.reg.get_flag(Flag::H));
        assert!(!c.reg.get_flag(Flag::C));
    }

    #[test]
    fn test_inc_dec_r16_touch_no_flags() {
        // INC BC; DEC DE
        let (mut c, _) = cpu(&[0x03, 0x1b]);
        c.reg.set_f(0xf0);
        c.reg.set_bc(0xffff);
        c.reg.set_de(0x0000);
        c.step();
        c.step();
        assert_eq!(c.reg.get_bc(), 0x0000);
        assert_eq!(c.reg.get_de(), 0xffff);
        assert_eq!(c.reg.f(), 0xf0);
    }

    #[test]
    fn test_push_pop_af_masks_flags() {
        // LD BC,0x12ff; PUSH BC; POP AF
        let (mut c, bus) = cpu(&[0x01, 0xff, 0x12, 0xc5, 0xf1]);
        c.step();
        assert_eq!(c.step(), Step::Cycles(4));
        assert_eq!(bus.borrow().get(0xfffd), 0x12);
        assert_eq!(bus.borrow().get(0xfffc), 0xff);
        assert_eq!(c.step(), Step::Cycles(3));
        assert_eq!(c.reg.get_af(), 0x12f0);
        assert_eq!(c.reg.sp, 0xfffe);
    }

    #[test]
    fn test_ei_takes_effect_after_next_instruction() {
        // EI; NOP; NOP
        let (mut c, _) = cpu(&[0xfb, 0x00, 0x00]);
        c.step();
        assert!(!c.ime);
        c.step();
        assert!(c.ime);
    }

    #[test]
    fn test_di_cancels_pending_ei() {
        // EI; DI; NOP
        let (mut c, _) = cpu(&[0xfb, 0xf3, 0x00]);
        c.step();
        c.step();
        assert!(!c.ime);
        c.step();
        assert!(!c.ime);
    }

    #[test]
    fn test_interrupt_dispatch_priority() {
        let (mut c, bus) = cpu(&[0x00]);
        bus.borrow_mut().set(0xffff, 0x05);
        bus.borrow_mut().set(0xff0f, 0x05);
        c.ime = true;
        assert_eq!(c.step(), Step::Cycles(5));
        assert_eq!(c.reg.pc, 0x0040);
        assert_eq!(bus.borrow().get(0xff0f), 0x04);
        assert!(!c.ime);
        assert_eq!(c.serviced, Some(INTFlag::VBlank));
        // 返回地址压栈，高8位在高地址
        assert_eq!(c.reg.sp, 0xfffc);
        assert_eq!(bus.borrow().get(0xfffd), 0x01);
        assert_eq!(bus.borrow().get(0xfffc), 0x00);
    }

    #[test]
    fn test_halt_wakes_without_ime() {
        // HALT; INC A
        let (mut c, bus) = cpu(&[0x76, 0x3c]);
        c.reg.a = 0;
        c.step();
        assert!(c.halted);
        assert_eq!(c.step(), Step::Halted);
        assert_eq!(c.step(), Step::Halted);
        assert_eq!(c.reg.pc, 0x0101);
        bus.borrow_mut().set(0xffff, 0x04);
        bus.borrow_mut().set(0xff0f, 0x04);
        assert_eq!(c.step(), Step::Cycles(1));
        assert!(!c.halted);
        assert_eq!(c.reg.a, 1);
        assert_eq!(c.reg.pc, 0x0102);
        assert_eq!(bus.borrow().get(0xff0f), 0x04);
    }

    #[test]
    fn test_halt_wakes_into_interrupt_with_ime() {
        let (mut c, bus) = cpu(&[0x76, 0x00]);
        c.ime = true;
        c.step();
        assert_eq!(c.step(), Step::Halted);
        bus.borrow_mut().set(0xffff, 0x10);
        bus.borrow_mut().set(0xff0f, 0x10);
        assert_eq!(c.step(), Step::Cycles(5));
        assert_eq!(c.reg.pc, 0x0060);
    }

    #[test]
    fn test_illegal_opcode_returns_zero() {
        let (mut c, _) = cpu(&[0xd3, 0x00]);
        assert_eq!(c.step(), Step::Cycles(0));
        assert_eq!(c.reg.pc, 0x0101);
    }

    #[test]
    fn test_conditional_branch_cycles() {
        // JR NZ,+2 (Z=1, 不跳转); JR Z,+0 (跳转)
        let (mut c, _) = cpu(&[0x20, 0x02, 0x28, 0x00]);
        c.reg.set_flag(Flag::Z, true);
        assert_eq!(c.step(), Step::Cycles(2));
        assert_eq!(c.step(), Step::Cycles(3));
        assert_eq!(c.reg.pc, 0x0104);
    }

    #[test]
    fn test_conditional_call_uses_carry_flag() {
        // CALL C,0x0200 (C=0, Z=1, 不调用); CALL NC,0x0200
        let (mut c, _) = cpu(&[0xdc, 0x00, 0x02, 0xd4, 0x00, 0x02]);
        c.reg.set_flag(Flag::Z, true);
        c.reg.set_flag(Flag::C, false);
        assert_eq!(c.step(), Step::Cycles(3));
        assert_eq!(c.reg.pc, 0x0103);
        assert_eq!(c.step(), Step::Cycles(6));
        assert_eq!(c.reg.pc, 0x0200);
    }

    #[test]
    fn test_call_and_ret() {
        let (mut c, bus) = cpu(&[0xcd, 0x00, 0x02]);
        bus.borrow_mut().set(0x0200, 0xc9);
        assert_eq!(c.step(), Step::Cycles(6));
        assert_eq!(c.step(), Step::Cycles(4));
        assert_eq!(c.reg.pc, 0x0103);
    }

    #[test]
    fn test_daa_after_add() {
        // LD A,0x15; ADD A,0x27; DAA
        let (mut c, _) = cpu(&[0x3e, 0x15, 0xc6, 0x27, 0x27]);
        c.step();
        c.step();
        c.step();
        assert_eq!(c.reg.a, 0x42);
        assert!(!c.reg.get_flag(Flag::C));
    }

    #[test]
    fn test_cb_cycles_and_semantics() {
        // SWAP A; BIT 7,(HL); SET 0,(HL); RES 7,B
        let (mut c, bus) = cpu(&[0xcb, 0x37, 0xcb, 0x7e, 0xcb, 0xc6, 0xcb, 0xb8]);
        c.reg.a = 0xf1;
        c.reg.set_hl(0xc000);
        c.reg.b = 0xff;
        assert_eq!(c.step(), Step::Cycles(2));
        assert_eq!(c.reg.a, 0x1f);
        assert_eq!(c.step(), Step::Cycles(3));
        assert!(c.reg.get_flag(Flag::Z));
        assert_eq!(c.step(), Step::Cycles(4));
        assert_eq!(bus.borrow().get(0xc000), 0x01);
        c.step();
        assert_eq!(c.reg.b, 0x7f);
    }

    #[test]
    fn test_ld_sp_offset_flags() {
        // LD HL,SP-1
        let (mut c, _) = cpu(&[0xf8, 0xff]);
        c.reg.sp = 0x0001;
        assert_eq!(c.step(), Step::Cycles(3));
        assert_eq!(c.reg.get_hl(), 0x0000);
        assert!(c.reg.get_flag(Flag::H));
        assert!(c.reg.get_flag(Flag::C));
        assert!(!c.reg.get_flag(Flag::Z));
    }

    #[test]
    fn test_stop_switches_speed_when_armed() {
        let (mut c, bus) = cpu(&[0x10, 0x00, 0x10, 0x00]);
        c.step();
        assert_eq!(c.stop_pc, None);
        assert_eq!(c.reg.pc, 0x0102);
        bus.borrow_mut().armed = true;
        c.step();
        assert_eq!(c.stop_pc, Some(0x0102));
        assert!(!bus.borrow().armed);
    }

    #[test]
    fn test_pc_wraps() {
        let (mut c, _) = cpu(&[]);
        c.reg.pc = 0xffff;
        c.step();
        assert_eq!(c.reg.pc, 0x0000);
    }
}
