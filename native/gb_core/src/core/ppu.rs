use std::cell::RefCell;
use std::rc::Rc;

use crate::core::convention::{HardwareMode, DOTS_PER_LINE, LINES_PER_FRAME, SCREEN_H, SCREEN_W};
use crate::core::intf::{INTFlag, Intf};
use crate::core::memory::Memory;

/// 模式2持续的时钟周期
const OAM_SEARCH_DOTS: u32 = 80;
/// 模式3持续的时钟周期
const TRANSFER_DOTS: u32 = 172;
/// 每条扫描线最多显示的Sprite数量
const SPRITES_PER_LINE: usize = 10;

/// LCD控制寄存器(0xff40)，控制画面中的对象是否显示以及如何显示
#[derive(Clone, Copy)]
pub struct LCDC {
    data: u8,
}

impl LCDC {
    /// 第7位，控制LCD是否亮起
    fn lcd_enable(self) -> bool {
        self.data & 0x80 != 0
    }

    /// 第6位，window tile map的起始地址，0: 0x9800，1: 0x9c00
    fn win_map(self) -> u16 {
        if self.data & 0x40 != 0 { 0x9c00 } else { 0x9800 }
    }

    /// 第5位，是否显示窗口
    fn window_enable(self) -> bool {
        self.data & 0x20 != 0
    }

    /// 第4位，BG和Window的tile data寻址模式，1: 以0x8000为基址的无符号寻址，0: 以0x9000为基址的有符号寻址
    fn unsigned_tiles(self) -> bool {
        self.data & 0x10 != 0
    }

    /// 第3位，bg tile map的起始地址，0: 0x9800，1: 0x9c00
    fn bg_map(self) -> u16 {
        if self.data & 0x08 != 0 { 0x9c00 } else { 0x9800 }
    }

    /// 第2位，Sprite是否由2个竖直排列的tile组成
    fn obj_tall(self) -> bool {
        self.data & 0x04 != 0
    }

    /// 第1位，是否显示sprite
    fn obj_enable(self) -> bool {
        self.data & 0x02 != 0
    }

    /// 第0位
    /// 黑白模式下为0时bg和window都显示为空白
    /// 彩色模式下为0时sprite始终显示在bg之上
    fn bg_enable(self) -> bool {
        self.data & 0x01 != 0
    }
}

/// PPU当前所处的阶段，数值即STAT寄存器的0~1位
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PPUMode {
    /// 模式0: 一行扫描完毕，等待进入下一行
    HBlank = 0,
    /// 模式1: 第144~153行，从右下角回到左上角
    VBlank = 1,
    /// 模式2: 查找与当前扫描线相交的Sprite
    OamSearch = 2,
    /// 模式3: 向LCD驱动传输像素
    Transfer = 3,
}

/// 帧缓冲中每个像素的颜色编号来自哪个调色板
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PaletteSource {
    Bgp,
    Obp0,
    Obp1,
    /// 彩色模式下的背景调色板编号(0~7)
    CgbBg(u8),
    /// 彩色模式下的Sprite调色板编号(0~7)
    CgbObj(u8),
}

/// 一帧画面渲染时所使用的黑白调色板寄存器
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PaletteSnapshot {
    pub bgp: u8,
    pub obp0: u8,
    pub obp1: u8,
}

impl PaletteSnapshot {
    /// 将颜色编号(0~3)转换为灰度编号(0: 白 ~ 3: 黑)，彩色调色板的像素原样返回颜色编号
    pub fn shade(&self, src: PaletteSource, i: u8) -> u8 {
        let palette = match src {
            PaletteSource::Bgp => self.bgp,
            PaletteSource::Obp0 => self.obp0,
            PaletteSource::Obp1 => self.obp1,
            PaletteSource::CgbBg(_) | PaletteSource::CgbObj(_) => return i,
        };
        (palette >> (i * 2)) & 0x03
    }
}

/// 彩色模式下的调色板内存，8个调色板，每个4种颜色，每个颜色2字节(RGB555)
/// 通过索引寄存器(BCPS/OCPS)寻址，数据寄存器(BCPD/OCPD)读写
struct PaletteRam {
    /// 索引寄存器的0~5位
    i: u8,
    /// 索引寄存器的第7位，为1时每次写入数据后索引自增
    auto_inc: bool,
    data: [u8; 64],
}

impl PaletteRam {
    fn power_up() -> Self {
        Self {
            i: 0,
            auto_inc: false,
            data: [0xff; 64],
        }
    }

    fn get_index(&self) -> u8 {
        0x40 | (if self.auto_inc { 0x80 } else { 0x00 }) | self.i
    }

    fn set_index(&mut self, v: u8) {
        self.auto_inc = v & 0x80 != 0;
        self.i = v & 0x3f;
    }

    fn get_data(&self) -> u8 {
        self.data[self.i as usize]
    }

    fn set_data(&mut self, v: u8) {
        self.data[self.i as usize] = v;
        if self.auto_inc {
            self.i = (self.i + 1) & 0x3f;
        }
    }

    /// 第p个调色板中编号为c的颜色
    fn color(&self, p: u8, c: u8) -> u16 {
        let i = (p as usize & 0x07) * 8 + (c as usize & 0x03) * 2;
        (u16::from(self.data[i]) | (u16::from(self.data[i + 1]) << 8)) & 0x7fff
    }
}

/// BG tile或Sprite的属性
#[derive(Clone, Copy, Default)]
struct Attr {
    /// 第0~2位：彩色模式下的调色板编号
    palette: u8,
    /// 第3位：彩色模式下tile数据位于VRAM Bank1
    bank: bool,
    /// 第4位：黑白模式下Sprite使用OBP1
    obp1: bool,
    flip_x: bool,
    flip_y: bool,
    /// 第7位：BG的颜色编号不为0时，BG显示在Sprite之上
    priority: bool,
}

impl From<u8> for Attr {
    fn from(v: u8) -> Self {
        Self {
            palette: v & 0x07,
            bank: v & 0x08 != 0,
            obp1: v & 0x10 != 0,
            flip_x: v & 0x20 != 0,
            flip_y: v & 0x40 != 0,
            priority: v & 0x80 != 0,
        }
    }
}

/// 从OAM中解析出的Sprite，坐标已经换算为屏幕坐标
struct Sprite {
    index: usize,
    y: i16,
    x: i16,
    tile: u8,
    attr: Attr,
}

/// 根据tile编号计算tile数据的地址
/// 无符号模式下以0x8000为基址；有符号模式下以0x9000为基址，编号0x80~0xff对应0x8800~0x8fff
pub fn tile_data_addr(unsigned: bool, id: u8) -> u16 {
    if unsigned {
        0x8000 + u16::from(id) * 16
    } else {
        0x9000u16.wrapping_add((i16::from(id as i8) * 16) as u16)
    }
}

/// 计算tile某一行中第tx个像素的颜色编号
/// lo保存每个像素颜色编号的低位，hi保存高位，第7位对应最左边的像素
fn color_index(lo: u8, hi: u8, tx: u8) -> u8 {
    let bit = 7 - tx;
    (((hi >> bit) & 0x01) << 1) | ((lo >> bit) & 0x01)
}

pub struct PPU {
    pub mode: HardwareMode,
    intf: Rc<RefCell<Intf>>,
    lcdc: LCDC,
    /// STAT寄存器的3~6位，分别是模式0、模式1、模式2以及LY==LYC的中断开关
    stat: u8,
    /// 上一次计算出的STAT中断条件，只有某个条件从不满足变为满足时才产生中断
    stat_lines: u8,
    ppu_mode: PPUMode,
    /// 当前扫描线已经经过的时钟周期
    dots: u32,
    scy: u8,
    scx: u8,
    /// 正在扫描的行，0~153
    ly: u8,
    lyc: u8,
    wy: u8,
    /// 窗口的实际横坐标是wx-7
    wx: u8,
    /// 窗口内部的行计数器，只有窗口在某一行实际显示后才递增
    win_line: u8,
    bgp: u8,
    obp0: u8,
    obp1: u8,
    bgpd: PaletteRam,
    obpd: PaletteRam,
    /// VRAM，彩色模式下有两个bank，bank1对应tile map的位置保存BG属性
    vram: [u8; 0x4000],
    vbk: usize,
    /// 40个Sprite，每个4字节: Y, X, tile编号, 属性
    oam: [u8; 0xa0],
    /// 正在绘制的帧
    back: Box<[u8; SCREEN_W * SCREEN_H]>,
    back_src: Box<[PaletteSource; SCREEN_W * SCREEN_H]>,
    /// 最近一帧完整的画面
    front: Box<[u8; SCREEN_W * SCREEN_H]>,
    front_src: Box<[PaletteSource; SCREEN_W * SCREEN_H]>,
    /// 进入VBlank时记录的调色板，换帧时交给front
    back_palettes: PaletteSnapshot,
    front_palettes: PaletteSnapshot,
    frame_ready: bool,
    /// 已完成的帧数
    pub frames: u64,
    /// 本次next是否进入了HBlank，供HDMA使用
    pub h_blank: bool,
}

impl PPU {
    pub fn power_up(mode: HardwareMode, intf: Rc<RefCell<Intf>>) -> Self {
        let palettes = PaletteSnapshot {
            bgp: 0xfc,
            obp0: 0xff,
            obp1: 0xff,
        };
        Self {
            mode,
            intf,
            lcdc: LCDC { data: 0x91 },
            stat: 0x00,
            stat_lines: 0x00,
            ppu_mode: PPUMode::OamSearch,
            dots: 0,
            scy: 0,
            scx: 0,
            ly: 0,
            lyc: 0,
            wy: 0,
            wx: 0,
            win_line: 0,
            bgp: palettes.bgp,
            obp0: palettes.obp0,
            obp1: palettes.obp1,
            bgpd: PaletteRam::power_up(),
            obpd: PaletteRam::power_up(),
            vram: [0; 0x4000],
            vbk: 0,
            oam: [0; 0xa0],
            back: Box::new([0; SCREEN_W * SCREEN_H]),
            back_src: Box::new([PaletteSource::Bgp; SCREEN_W * SCREEN_H]),
            front: Box::new([0; SCREEN_W * SCREEN_H]),
            front_src: Box::new([PaletteSource::Bgp; SCREEN_W * SCREEN_H]),
            back_palettes: palettes,
            front_palettes: palettes,
            frame_ready: false,
            frames: 0,
            h_blank: false,
        }
    }

    pub fn ly(&self) -> u8 {
        self.ly
    }

    pub fn ppu_mode(&self) -> PPUMode {
        self.ppu_mode
    }

    /// 最近一帧的颜色编号(0~3)，按行排列
    pub fn framebuffer(&self) -> &[u8] {
        &self.front[..]
    }

    /// 最近一帧每个像素所使用的调色板
    pub fn palette_sources(&self) -> &[PaletteSource] {
        &self.front_src[..]
    }

    pub fn palettes(&self) -> PaletteSnapshot {
        self.front_palettes
    }

    /// 彩色模式下背景调色板p中编号c的颜色(RGB555)
    pub fn cgb_bg_color(&self, p: u8, c: u8) -> u16 {
        self.bgpd.color(p, c)
    }

    /// 彩色模式下Sprite调色板p中编号c的颜色(RGB555)
    pub fn cgb_obj_color(&self, p: u8, c: u8) -> u16 {
        self.obpd.color(p, c)
    }

    pub fn frame_ready(&self) -> bool {
        self.frame_ready
    }

    /// 取走"新帧"标志，每一帧只会返回一次true
    pub fn take_frame(&mut self) -> bool {
        std::mem::replace(&mut self.frame_ready, false)
    }

    /// 推进cycles个时钟周期，每次只前进到下一个模式的边界
    /// 一条扫描线456个周期：模式2占80，模式3占172，其余为模式0；第144~153行整行都是模式1
    pub fn next(&mut self, cycles: u32) {
        self.h_blank = false;
        if !self.lcdc.lcd_enable() {
            return;
        }
        let mut cycles = cycles;
        while cycles > 0 {
            let boundary = match self.ppu_mode {
                PPUMode::OamSearch => OAM_SEARCH_DOTS,
                PPUMode::Transfer => OAM_SEARCH_DOTS + TRANSFER_DOTS,
                PPUMode::HBlank | PPUMode::VBlank => DOTS_PER_LINE,
            };
            let step = cycles.min(boundary - self.dots);
            self.dots += step;
            cycles -= step;
            if self.dots == boundary {
                self.advance_mode();
            }
        }
    }

    fn advance_mode(&mut self) {
        match self.ppu_mode {
            PPUMode::OamSearch => self.ppu_mode = PPUMode::Transfer,
            PPUMode::Transfer => {
                self.ppu_mode = PPUMode::HBlank;
                self.h_blank = true;
                self.render_line();
            }
            PPUMode::HBlank => {
                self.dots = 0;
                self.ly += 1;
                if self.ly as usize == SCREEN_H {
                    self.ppu_mode = PPUMode::VBlank;
                    self.back_palettes = PaletteSnapshot {
                        bgp: self.bgp,
                        obp0: self.obp0,
                        obp1: self.obp1,
                    };
                    self.intf.borrow_mut().hi(INTFlag::VBlank);
                } else {
                    self.ppu_mode = PPUMode::OamSearch;
                }
            }
            PPUMode::VBlank => {
                self.dots = 0;
                self.ly += 1;
                if self.ly == LINES_PER_FRAME {
                    self.ly = 0;
                    self.win_line = 0;
                    self.ppu_mode = PPUMode::OamSearch;
                    self.swap_frame();
                }
            }
        }
        self.update_stat();
    }

    fn swap_frame(&mut self) {
        std::mem::swap(&mut self.front, &mut self.back);
        std::mem::swap(&mut self.front_src, &mut self.back_src);
        self.front_palettes = self.back_palettes;
        self.frame_ready = true;
        self.frames += 1;
    }

    /// 重新计算STAT中断条件，任何一个条件出现上升沿时请求LCDStat中断
    fn update_stat(&mut self) {
        if !self.lcdc.lcd_enable() {
            self.stat_lines = 0;
            return;
        }
        let mode_bit = match self.ppu_mode {
            PPUMode::HBlank => 0x08,
            PPUMode::VBlank => 0x10,
            PPUMode::OamSearch => 0x20,
            PPUMode::Transfer => 0x00,
        };
        let mut lines = self.stat & mode_bit;
        if self.ly == self.lyc {
            lines |= self.stat & 0x40;
        }
        if lines & !self.stat_lines != 0 {
            self.intf.borrow_mut().hi(INTFlag::LCDStat);
        }
        self.stat_lines = lines;
    }

    fn set_lcdc(&mut self, v: u8) {
        let was_on = self.lcdc.lcd_enable();
        self.lcdc = LCDC { data: v };
        match (was_on, self.lcdc.lcd_enable()) {
            (true, false) => {
                log::debug!("LCD off at LY {}", self.ly);
                self.ly = 0;
                self.dots = 0;
                self.ppu_mode = PPUMode::HBlank;
                self.stat_lines = 0;
            }
            (false, true) => {
                log::debug!("LCD on");
                self.ly = 0;
                self.dots = 0;
                self.win_line = 0;
                self.ppu_mode = PPUMode::OamSearch;
                self.update_stat();
            }
            _ => {}
        }
    }

    fn vram_at(&self, bank: usize, a: u16) -> u8 {
        self.vram[bank * 0x2000 + (a as usize & 0x1fff)]
    }

    /// 渲染当前扫描线，写入正在绘制的帧
    fn render_line(&mut self) {
        let mut idx = [0u8; SCREEN_W];
        let mut src = [PaletteSource::Bgp; SCREEN_W];
        let mut bg_prio = [false; SCREEN_W];
        if self.render_bg(&mut idx, &mut src, &mut bg_prio) {
            self.win_line = self.win_line.wrapping_add(1);
        }
        if self.lcdc.obj_enable() {
            self.render_sprites(&mut idx, &mut src, &bg_prio);
        }
        let row = self.ly as usize * SCREEN_W;
        self.back[row..row + SCREEN_W].copy_from_slice(&idx);
        self.back_src[row..row + SCREEN_W].copy_from_slice(&src);
    }

    /// 获取tile map(起始地址为tmap)中坐标(x, y)处的像素颜色编号以及所属tile的属性
    fn bg_pixel(&self, tmap: u16, x: u8, y: u8) -> (u8, Attr) {
        let map_addr = tmap + u16::from(y / 8) * 32 + u16::from(x / 8);
        let id = self.vram_at(0, map_addr);
        let attr = match self.mode {
            HardwareMode::Dmg => Attr::default(),
            HardwareMode::Cgb => Attr::from(self.vram_at(1, map_addr)),
        };
        let tx = if attr.flip_x { 7 - x % 8 } else { x % 8 };
        let ty = if attr.flip_y { 7 - y % 8 } else { y % 8 };
        let addr = tile_data_addr(self.lcdc.unsigned_tiles(), id) + u16::from(ty) * 2;
        let bank = usize::from(attr.bank);
        let color = color_index(self.vram_at(bank, addr), self.vram_at(bank, addr + 1), tx);
        (color, attr)
    }

    /// 绘制一行背景和窗口，返回窗口是否在这一行显示过
    fn render_bg(
        &self,
        idx: &mut [u8; SCREEN_W],
        src: &mut [PaletteSource; SCREEN_W],
        bg_prio: &mut [bool; SCREEN_W],
    ) -> bool {
        if self.mode == HardwareMode::Dmg && !self.lcdc.bg_enable() {
            return false;
        }
        let wx = i16::from(self.wx) - 7;
        let win = self.lcdc.window_enable() && self.ly >= self.wy && self.wx <= 166;
        let mut win_drawn = false;
        for x in 0..SCREEN_W {
            let (color, attr) = if win && x as i16 >= wx {
                win_drawn = true;
                self.bg_pixel(self.lcdc.win_map(), (x as i16 - wx) as u8, self.win_line)
            } else {
                self.bg_pixel(
                    self.lcdc.bg_map(),
                    self.scx.wrapping_add(x as u8),
                    self.scy.wrapping_add(self.ly),
                )
            };
            idx[x] = color;
            src[x] = match self.mode {
                HardwareMode::Dmg => PaletteSource::Bgp,
                HardwareMode::Cgb => PaletteSource::CgbBg(attr.palette),
            };
            bg_prio[x] = attr.priority;
        }
        win_drawn
    }

    /// 在OAM中按顺序选出与当前扫描线相交的Sprite，最多10个
    /// 黑白模式下横坐标小的优先，横坐标相同时OAM中靠前的优先；彩色模式下只按OAM顺序
    fn line_sprites(&self) -> Vec<Sprite> {
        let h = if self.lcdc.obj_tall() { 16 } else { 8 };
        let ly = i16::from(self.ly);
        let mut sprites: Vec<Sprite> = self
            .oam
            .chunks_exact(4)
            .enumerate()
            .map(|(index, o)| Sprite {
                index,
                y: i16::from(o[0]) - 16,
                x: i16::from(o[1]) - 8,
                tile: o[2],
                attr: Attr::from(o[3]),
            })
            .filter(|s| ly >= s.y && ly < s.y + h)
            .take(SPRITES_PER_LINE)
            .collect();
        if self.mode == HardwareMode::Dmg {
            sprites.sort_by_key(|s| (s.x, s.index));
        }
        sprites
    }

    /// 绘制一行Sprite，每个像素由优先级最高且不透明的Sprite决定
    fn render_sprites(
        &self,
        idx: &mut [u8; SCREEN_W],
        src: &mut [PaletteSource; SCREEN_W],
        bg_prio: &[bool; SCREEN_W],
    ) {
        let h: i16 = if self.lcdc.obj_tall() { 16 } else { 8 };
        let mut claimed = [false; SCREEN_W];
        for s in self.line_sprites() {
            let mut row = (i16::from(self.ly) - s.y) as u8;
            if s.attr.flip_y {
                row = h as u8 - 1 - row;
            }
            // 8x16的Sprite忽略tile编号的最低位
            let tile = if h == 16 { s.tile & 0xfe } else { s.tile };
            let addr = 0x8000 + u16::from(tile) * 16 + u16::from(row) * 2;
            let bank = match self.mode {
                HardwareMode::Dmg => 0,
                HardwareMode::Cgb => usize::from(s.attr.bank),
            };
            let lo = self.vram_at(bank, addr);
            let hi = self.vram_at(bank, addr + 1);
            for col in 0..8u8 {
                let px = s.x + i16::from(col);
                if px < 0 || px >= SCREEN_W as i16 {
                    continue;
                }
                let px = px as usize;
                if claimed[px] {
                    continue;
                }
                let tx = if s.attr.flip_x { 7 - col } else { col };
                let color = color_index(lo, hi, tx);
                // 颜色编号0是透明的
                if color == 0 {
                    continue;
                }
                claimed[px] = true;
                let behind_bg = match self.mode {
                    HardwareMode::Dmg => s.attr.priority && idx[px] != 0,
                    HardwareMode::Cgb => {
                        self.lcdc.bg_enable() && (bg_prio[px] || s.attr.priority) && idx[px] != 0
                    }
                };
                if behind_bg {
                    continue;
                }
                idx[px] = color;
                src[px] = match self.mode {
                    HardwareMode::Dmg if s.attr.obp1 => PaletteSource::Obp1,
                    HardwareMode::Dmg => PaletteSource::Obp0,
                    HardwareMode::Cgb => PaletteSource::CgbObj(s.attr.palette),
                };
            }
        }
    }
}

impl Memory for PPU {
    fn get(&self, a: u16) -> u8 {
        match a {
            0x8000..=0x9fff => self.vram_at(self.vbk, a),
            0xfe00..=0xfe9f => self.oam[a as usize - 0xfe00],
            0xff40 => self.lcdc.data,
            // 0~2位由当前状态实时计算
            0xff41 => {
                let coincidence = if self.ly == self.lyc { 0x04 } else { 0x00 };
                0x80 | self.stat | coincidence | self.ppu_mode as u8
            }
            0xff42 => self.scy,
            0xff43 => self.scx,
            0xff44 => self.ly,
            0xff45 => self.lyc,
            0xff47 => self.bgp,
            0xff48 => self.obp0,
            0xff49 => self.obp1,
            0xff4a => self.wy,
            0xff4b => self.wx,
            0xff4f => 0xfe | self.vbk as u8,
            0xff68 => self.bgpd.get_index(),
            0xff69 => self.bgpd.get_data(),
            0xff6a => self.obpd.get_index(),
            0xff6b => self.obpd.get_data(),
            _ => 0xff,
        }
    }

    fn set(&mut self, a: u16, v: u8) {
        match a {
            0x8000..=0x9fff => self.vram[self.vbk * 0x2000 + (a as usize - 0x8000)] = v,
            0xfe00..=0xfe9f => self.oam[a as usize - 0xfe00] = v,
            0xff40 => self.set_lcdc(v),
            // 只有3~6位可写
            0xff41 => {
                self.stat = v & 0x78;
                self.update_stat();
            }
            0xff42 => self.scy = v,
            0xff43 => self.scx = v,
            // LY只读
            0xff44 => {}
            0xff45 => {
                self.lyc = v;
                self.update_stat();
            }
            0xff47 => self.bgp = v,
            0xff48 => self.obp0 = v,
            0xff49 => self.obp1 = v,
            0xff4a => self.wy = v,
            0xff4b => self.wx = v,
            0xff4f => self.vbk = (v & 0x01) as usize,
            0xff68 => self.bgpd.set_index(v),
            0xff69 => self.bgpd.set_data(v),
            0xff6a => self.obpd.set_index(v),
            0xff6b => self.obpd.set_data(v),
            _ => {}
        }
    }
}
