//! Positioned reader over the DVI byte stream.
//!
//! DVI files are read in two passes that jump around the buffer (the
//! postamble is found by scanning backward from the end), so the reader
//! keeps an explicit cursor instead of consuming a slice front to back.
//!
//! All multi-byte integers are big endian. Distance parameters are two's
//! complement; the three-byte forms need manual sign extension because no
//! primitive integer has 24 bits.
//!
//! Reading past the end of the buffer is not an error here: `u8` returns 0,
//! a harmless value the driver detects at its next cursor check, and the
//! wider getters read whatever zero bytes they are short. The driver checks
//! `cursor() >= len()` after every opcode.

use crate::machine::Registers;

pub(crate) struct Reader<'a> {
    b: &'a [u8],
    cursor: usize,
}

impl<'a> Reader<'a> {
    pub fn new(b: &'a [u8]) -> Self {
        Self { b, cursor: 0 }
    }

    pub fn len(&self) -> usize {
        self.b.len()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Move the cursor to an absolute offset.
    pub fn seek(&mut self, cursor: usize) {
        self.cursor = cursor;
    }

    pub fn byte_at(&self, offset: usize) -> u8 {
        self.b.get(offset).copied().unwrap_or(0)
    }

    pub fn u8(&mut self) -> u8 {
        let byte = self.byte_at(self.cursor);
        self.cursor += 1;
        byte
    }

    pub fn i8(&mut self) -> i32 {
        self.u8() as i8 as i32
    }

    pub fn u16(&mut self) -> i32 {
        let a = self.u8() as i32;
        let b = self.u8() as i32;
        (a << 8) | b
    }

    pub fn i16(&mut self) -> i32 {
        let a = self.i8();
        let b = self.u8() as i32;
        (a << 8) | b
    }

    pub fn u24(&mut self) -> i32 {
        let a = self.u16();
        let b = self.u8() as i32;
        (a << 8) | b
    }

    pub fn i24(&mut self) -> i32 {
        let a = self.i16();
        let b = self.u8() as i32;
        (a << 8) | b
    }

    pub fn i32(&mut self) -> i32 {
        let a = self.i16();
        let b = self.u16();
        (a << 16) | b
    }

    /// Read `n` raw bytes, stopping short at the end of the buffer.
    pub fn bytes(&mut self, n: usize) -> &'a [u8] {
        let b: &'a [u8] = self.b;
        let start = self.cursor.min(b.len());
        let end = self.cursor.saturating_add(n).min(b.len());
        self.cursor = self.cursor.saturating_add(n);
        &b[start..end]
    }

    pub fn skip(&mut self, n: usize) {
        self.cursor = self.cursor.saturating_add(n);
    }

    /// Read the first parameter of an opcode, without touching any other
    /// interpreter state.
    ///
    /// Opcodes 0-127 and 171-234 carry their parameter in the opcode byte
    /// itself (a character code and a font number respectively). The sized
    /// forms read 1 to 4 bytes; whether the read is signed follows the DVI
    /// convention: distances are signed, counts and codes are unsigned. The
    /// four-byte font number of `fnt4` is read signed, matching the engine
    /// that produced these files. For the two rule commands the first
    /// parameter is the height; the width is read by the semantic handler.
    /// `w0`/`x0`/`y0`/`z0` return the current value of their register, and
    /// the control opcodes return 0.
    pub fn first_param(&mut self, op_code: u8, regs: &Registers) -> i32 {
        match op_code {
            // setchar: the character code is the opcode.
            0..=127 => op_code as i32,
            // set1-set4
            128 => self.u8() as i32,
            129 => self.u16(),
            130 => self.u24(),
            131 => self.i32(),
            // set_rule: the height.
            132 => self.i32(),
            // put1-put4
            133 => self.u8() as i32,
            134 => self.u16(),
            135 => self.u24(),
            136 => self.i32(),
            // put_rule: the height.
            137 => self.i32(),
            // nop, bop, eop, push, pop
            138..=142 => 0,
            // right1-right4
            143 => self.i8(),
            144 => self.i16(),
            145 => self.i24(),
            146 => self.i32(),
            147 => regs.w,
            // w1-w4
            148 => self.i8(),
            149 => self.i16(),
            150 => self.i24(),
            151 => self.i32(),
            152 => regs.x,
            // x1-x4
            153 => self.i8(),
            154 => self.i16(),
            155 => self.i24(),
            156 => self.i32(),
            // down1-down4
            157 => self.i8(),
            158 => self.i16(),
            159 => self.i24(),
            160 => self.i32(),
            161 => regs.y,
            // y1-y4
            162 => self.i8(),
            163 => self.i16(),
            164 => self.i24(),
            165 => self.i32(),
            166 => regs.z,
            // z1-z4
            167 => self.i8(),
            168 => self.i16(),
            169 => self.i24(),
            170 => self.i32(),
            // fnt_num_0 - fnt_num_63: the font number is the opcode.
            171..=234 => (op_code - 171) as i32,
            // fnt1-fnt4, the last one signed
            235 => self.u8() as i32,
            236 => self.u16(),
            237 => self.u24(),
            238 => self.i32(),
            // xxx1-xxx4: the payload length
            239 => self.u8() as i32,
            240 => self.u16(),
            241 => self.u24(),
            242 => self.i32(),
            // fnt_def1-fnt_def4: the font number
            243 => self.u8() as i32,
            244 => self.u16(),
            245 => self.u24(),
            246 => self.i32(),
            // pre, post, post_post, and the undefined opcodes
            247..=255 => 0,
        }
    }
}

/// DVI mnemonic of an opcode, for debug traces.
pub(crate) fn mnemonic(op_code: u8) -> String {
    match op_code {
        0..=127 => format!("setchar{op_code}"),
        128..=131 => format!("set{}", op_code - 127),
        132 => "set_rule".into(),
        133..=136 => format!("put{}", op_code - 132),
        137 => "put_rule".into(),
        138 => "nop".into(),
        139 => "bop".into(),
        140 => "eop".into(),
        141 => "push".into(),
        142 => "pop".into(),
        143..=146 => format!("right{}", op_code - 142),
        147 => "w0".into(),
        148..=151 => format!("w{}", op_code - 147),
        152 => "x0".into(),
        153..=156 => format!("x{}", op_code - 152),
        157..=160 => format!("down{}", op_code - 156),
        161 => "y0".into(),
        162..=165 => format!("y{}", op_code - 161),
        166 => "z0".into(),
        167..=170 => format!("z{}", op_code - 166),
        171..=234 => format!("fnt_num_{}", op_code - 171),
        235..=238 => format!("fnt{}", op_code - 234),
        239..=242 => format!("xxx{}", op_code - 238),
        243..=246 => format!("fnt_def{}", op_code - 242),
        247 => "pre".into(),
        248 => "post".into(),
        249 => "post_post".into(),
        250..=255 => format!("undefined{op_code}"),
    }
}
