pub trait Memory {
    fn get(&self, a: u16) -> u8;
    fn set(&mut self, a: u16, v: u8);

    // 获取一个字的内容，也就是16位的数据
    fn get_word(&self, a: u16) -> u16 {
        // 小端序，低地址保存低8位
        u16::from(self.get(a)) | (u16::from(self.get(a.wrapping_add(1))) << 8)
    }

    // 设置一个字的内容，即连续设置两个相邻地址的数据
    fn set_word(&mut self, a: u16, v: u16) {
        self.set(a, (v & 0x00ff) as u8);
        self.set(a.wrapping_add(1), (v >> 8) as u8);
    }
}

/// CPU看到的地址总线，除了普通的读写，还需要处理STOP指令引起的倍速切换
pub trait Bus: Memory {
    /// 执行STOP指令时调用，彩色模式下KEY1第0位为1时清除第0位并翻转第7位，返回是否切换了速度
    fn switch_speed(&mut self) -> bool;
}
