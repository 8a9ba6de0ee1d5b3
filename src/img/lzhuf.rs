//! ## Teledisk advanced compression
//!
//! A TD0 image whose signature is `td` has everything after its 12 byte header compressed with
//! LZSS over a 4K window, where literals and match lengths are coded by an adaptive Huffman
//! tree (the LZHUF scheme of Okumura and Yoshizaki).  Match positions are coded with a fixed
//! prefix table for the upper 6 bits followed by 6 literal bits.
//!
//! Decoding cannot fail.  When the compressed stream runs dry the decoder emits the symbol
//! it was working on and stops, so the caller always gets whatever could be recovered.

use log::{trace,debug};

/// size of the sliding window
const SBSIZE: usize = 4096;
/// longest match that can be coded
const LASIZE: usize = 60;
/// matches this long or shorter are not coded
const THRESHOLD: usize = 2;
/// number of symbols: 256 literals plus the match lengths
const N_CHAR: usize = 256 - THRESHOLD + LASIZE;
/// number of nodes in the tree
const TSIZE: usize = N_CHAR * 2 - 1;
const ROOT: usize = TSIZE - 1;
/// root frequency that triggers a rebuild
const MAX_FREQ: u32 = 0x8000;
const WINDOW_MASK: usize = SBSIZE - 1;

/// Number of extra bits in a position code, indexed by the upper nibble of the first byte.
const D_LEN: [u8;16] = [2,2,3,3,3,4,4,4,4,5,5,5,6,6,6,7];
/// Upper 6 bits of a match position, indexed by the first byte of the position code.
const D_CODE: [u8;256] = build_d_code();

const fn build_d_code() -> [u8;256] {
    // (how many codes, table entries per code)
    let runs: [(usize,usize);6] = [(1,32),(3,16),(8,8),(12,4),(24,2),(16,1)];
    let mut ans = [0u8;256];
    let mut ptr = 0;
    let mut code = 0;
    let mut r = 0;
    while r < runs.len() {
        let (n,width) = runs[r];
        let mut i = 0;
        while i < n {
            let mut k = 0;
            while k < width {
                ans[ptr] = code;
                ptr += 1;
                k += 1;
            }
            code += 1;
            i += 1;
        }
        r += 1;
    }
    ans
}

/// Adaptive Huffman tree.  Node `c` has children `son[c]` and `son[c]+1`; a node whose
/// son is `>= TSIZE` is a leaf for symbol `son[c]-TSIZE`.  Frequencies are kept sorted
/// in ascending order so that the tree stays a valid Huffman tree as counts change.
struct Tree {
    freq: [u32;TSIZE+1],
    parent: [usize;TSIZE+N_CHAR],
    son: [usize;TSIZE]
}

impl Tree {
    fn new() -> Self {
        let mut ans = Self {
            freq: [0;TSIZE+1],
            parent: [0;TSIZE+N_CHAR],
            son: [0;TSIZE]
        };
        for i in 0..N_CHAR {
            ans.freq[i] = 1;
            ans.son[i] = i + TSIZE;
            ans.parent[i + TSIZE] = i;
        }
        let mut j = 0;
        for i in N_CHAR..=ROOT {
            ans.freq[i] = ans.freq[j] + ans.freq[j+1];
            ans.son[i] = j;
            ans.parent[j] = i;
            ans.parent[j+1] = i;
            j += 2;
        }
        // sentinel stops the upward search in `update`
        ans.freq[TSIZE] = 0xffff;
        ans.parent[ROOT] = 0;
        ans
    }
    /// Halve all the leaf counts and build the internal nodes again.
    fn rebuild(&mut self) {
        trace!("rebuilding Huffman tree");
        let mut j = 0;
        for i in 0..TSIZE {
            if self.son[i] >= TSIZE {
                self.freq[j] = (self.freq[i] + 1) / 2;
                self.son[j] = self.son[i];
                j += 1;
            }
        }
        let mut i = 0;
        for j in N_CHAR..TSIZE {
            let f = self.freq[i] + self.freq[i+1];
            self.freq[j] = f;
            let mut k = j - 1;
            while f < self.freq[k] {
                k -= 1;
            }
            k += 1;
            self.freq.copy_within(k..j,k+1);
            self.freq[k] = f;
            self.son.copy_within(k..j,k+1);
            self.son[k] = i;
            i += 2;
        }
        for i in 0..TSIZE {
            let k = self.son[i];
            self.parent[k] = i;
            if k < TSIZE {
                self.parent[k+1] = i;
            }
        }
    }
    /// Count one more occurrence of `symbol` and restore the ordering.
    fn update(&mut self,symbol: usize) {
        if self.freq[ROOT] == MAX_FREQ {
            self.rebuild();
        }
        let mut c = self.parent[symbol + TSIZE];
        loop {
            self.freq[c] += 1;
            let k = self.freq[c];
            let mut l = c + 1;
            if k > self.freq[l] {
                while k > self.freq[l+1] {
                    l += 1;
                }
                self.freq[c] = self.freq[l];
                self.freq[l] = k;
                let i = self.son[c];
                self.parent[i] = l;
                if i < TSIZE {
                    self.parent[i+1] = l;
                }
                let j = self.son[l];
                self.son[l] = i;
                self.parent[j] = c;
                if j < TSIZE {
                    self.parent[j+1] = c;
                }
                self.son[c] = j;
                c = l;
            }
            c = self.parent[c];
            if c == 0 {
                break;
            }
        }
    }
}

/// MSB-first bit reader working through a 16 bit buffer.
struct BitReader<'a> {
    src: &'a [u8],
    ptr: usize,
    bits: u32,
    buf: u32,
    eof: bool
}

impl <'a> BitReader<'a> {
    fn new(src: &'a [u8]) -> Self {
        Self { src, ptr: 0, bits: 0, buf: 0, eof: false }
    }
    /// Next input byte, exhausted input reads as 0 and raises the eof flag.
    fn next_byte(&mut self) -> u32 {
        match self.src.get(self.ptr) {
            Some(b) => {
                self.ptr += 1;
                *b as u32
            },
            None => {
                self.eof = true;
                0
            }
        }
    }
    fn get_bit(&mut self) -> usize {
        if self.bits == 0 {
            self.buf |= self.next_byte() << 8;
            self.bits = 7;
        } else {
            self.bits -= 1;
        }
        let t = (self.buf >> 15) & 1;
        self.buf = (self.buf << 1) & 0xffff;
        t as usize
    }
    fn get_byte(&mut self) -> usize {
        if self.bits < 8 {
            self.buf |= self.next_byte() << (8 - self.bits);
        } else {
            self.bits -= 8;
        }
        let t = self.buf >> 8;
        self.buf = (self.buf << 8) & 0xffff;
        t as usize
    }
}

/// Streaming decoder, yields expanded bytes one at a time.
pub struct Expander<'a> {
    tree: Tree,
    reader: BitReader<'a>,
    ring: [u8;SBSIZE],
    r: usize,
    /// pending string copy as (window start, length, copied so far)
    copy: Option<(usize,usize,usize)>,
    done: bool
}

impl <'a> Expander<'a> {
    pub fn new(compressed: &'a [u8]) -> Self {
        Self {
            tree: Tree::new(),
            reader: BitReader::new(compressed),
            ring: [0x20;SBSIZE],
            r: SBSIZE - LASIZE,
            copy: None,
            done: false
        }
    }
    fn decode_char(&mut self) -> usize {
        let mut c = self.tree.son[ROOT];
        while c < TSIZE {
            c += self.reader.get_bit();
            c = self.tree.son[c];
        }
        c -= TSIZE;
        self.tree.update(c);
        c
    }
    fn decode_position(&mut self) -> usize {
        let mut i = self.reader.get_byte();
        let c = (D_CODE[i] as usize) << 6;
        let mut j = D_LEN[i >> 4];
        while j > 1 {
            i = (i << 1) | self.reader.get_bit();
            j -= 1;
        }
        (i & 0x3f) | c
    }
    fn emit(&mut self,b: u8) -> u8 {
        self.ring[self.r] = b;
        self.r = (self.r + 1) & WINDOW_MASK;
        b
    }
}

impl <'a> Iterator for Expander<'a> {
    type Item = u8;
    fn next(&mut self) -> Option<u8> {
        if self.done {
            return None;
        }
        // the byte produced by the call that hit the end of input is still delivered
        if self.reader.eof {
            self.done = true;
            return None;
        }
        if let Some((start,len,k)) = self.copy {
            if k < len {
                self.copy = Some((start,len,k+1));
                let b = self.ring[(start + k) & WINDOW_MASK];
                return Some(self.emit(b));
            }
            self.copy = None;
        }
        let c = self.decode_char();
        if c < 256 {
            return Some(self.emit(c as u8));
        }
        let pos = self.decode_position();
        let start = (self.r + SBSIZE - pos - 1) & WINDOW_MASK;
        let len = c - 255 + THRESHOLD;
        self.copy = Some((start,len,1));
        let b = self.ring[start];
        Some(self.emit(b))
    }
}

/// Expand an LZHUF stream.  This never fails, truncated input yields a truncated result.
pub fn expand(compressed: &[u8]) -> Vec<u8> {
    let ans: Vec<u8> = Expander::new(compressed).collect();
    debug!("expanded {} bytes to {}",compressed.len(),ans.len());
    ans
}
