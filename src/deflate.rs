use rayon::prelude::*;

const ADLER_BASE: u32 = 65_521;
const ADLER_CHUNK_BYTES: usize = 1 << 20;

const CHUNK_BYTES: usize = 128 * 1024;
const MIN_MATCH: usize = 3;
const MAX_MATCH: usize = 258;
const MAX_DISTANCE: usize = 32 * 1024;
const MAX_CHAIN_STEPS: usize = 64;
const HASH_BITS: usize = 15;
const HASH_SIZE: usize = 1 << HASH_BITS;

const LENGTH_BASE: [usize; 29] = [
    3, 4, 5, 6, 7, 8, 9, 10, 11, 13, 15, 17, 19, 23, 27, 31, 35, 43, 51, 59, 67, 83, 99, 115, 131,
    163, 195, 227, 258,
];

const LENGTH_EXTRA: [u8; 29] = [
    0, 0, 0, 0, 0, 0, 0, 0, 1, 1, 1, 1, 2, 2, 2, 2, 3, 3, 3, 3, 4, 4, 4, 4, 5, 5, 5, 5, 0,
];

const DIST_BASE: [usize; 30] = [
    1, 2, 3, 4, 5, 7, 9, 13, 17, 25, 33, 49, 65, 97, 129, 193, 257, 385, 513, 769, 1025, 1537,
    2049, 3073, 4097, 6145, 8193, 12289, 16385, 24577,
];

const DIST_EXTRA: [u8; 30] = [
    0, 0, 0, 0, 1, 1, 2, 2, 3, 3, 4, 4, 5, 5, 6, 6, 7, 7, 8, 8, 9, 9, 10, 10, 11, 11, 12, 12, 13,
    13,
];

// Number of LZ77 chunks a payload of `len` bytes is planned as.
pub(crate) fn chunk_count(len: usize) -> usize {
    if len == 0 { 1 } else { len.div_ceil(CHUNK_BYTES) }
}

#[derive(Clone, Copy, Debug)]
struct AdlerSum {
    a: u32,
    b: u32,
    len: usize,
}

impl AdlerSum {
    fn identity() -> Self {
        Self { a: 1, b: 0, len: 0 }
    }

    fn of(data: &[u8]) -> Self {
        let mut a: u32 = 1;
        let mut b: u32 = 0;
        for &byte in data {
            a += byte as u32;
            if a >= ADLER_BASE {
                a -= ADLER_BASE;
            }
            b += a;
            b %= ADLER_BASE;
        }
        Self {
            a,
            b,
            len: data.len(),
        }
    }

    // Associative merge: the right side started from the canonical seed
    // (a=1, b=0), so its seed contribution has to be backed out.
    fn combine(self, rhs: Self) -> Self {
        if self.len == 0 {
            return rhs;
        }
        if rhs.len == 0 {
            return self;
        }
        let a = (self.a + rhs.a + ADLER_BASE - 1) % ADLER_BASE;
        let b = (self.b as u64
            + rhs.b as u64
            + ((rhs.len as u64 % ADLER_BASE as u64) * ((self.a + ADLER_BASE - 1) as u64)))
            % ADLER_BASE as u64;
        Self {
            a,
            b: b as u32,
            len: self.len + rhs.len,
        }
    }

    fn value(self) -> u32 {
        (self.b << 16) | self.a
    }
}

fn adler32(data: &[u8], chunk_size: usize) -> u32 {
    let partials: Vec<AdlerSum> = split_ranges(data.len(), chunk_size)
        .par_iter()
        .map(|&(start, end)| AdlerSum::of(&data[start..end]))
        .collect();
    partials
        .into_iter()
        .fold(AdlerSum::identity(), AdlerSum::combine)
        .value()
}

#[derive(Clone, Copy, Debug)]
enum LzOp {
    Literal(u8),
    Match { len: u16, dist: u16 },
}

struct BitWriter {
    out: Vec<u8>,
    bit_buf: u64,
    bit_count: u8,
}

impl BitWriter {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            out: Vec::with_capacity(capacity),
            bit_buf: 0,
            bit_count: 0,
        }
    }

    fn push_bits(&mut self, bits: u32, count: u8) {
        if count == 0 {
            return;
        }
        self.bit_buf |= (bits as u64) << self.bit_count;
        self.bit_count += count;
        while self.bit_count >= 8 {
            self.out.push((self.bit_buf & 0xFF) as u8);
            self.bit_buf >>= 8;
            self.bit_count -= 8;
        }
    }

    fn into_bytes(mut self) -> Vec<u8> {
        if self.bit_count > 0 {
            self.out.push((self.bit_buf & 0xFF) as u8);
        }
        self.out
    }
}

fn split_ranges(total: usize, chunk: usize) -> Vec<(usize, usize)> {
    if total == 0 {
        return vec![(0, 0)];
    }
    let chunk = chunk.max(1);
    let mut ranges = Vec::with_capacity(total.div_ceil(chunk));
    let mut start = 0usize;
    while start < total {
        let end = (start + chunk).min(total);
        ranges.push((start, end));
        start = end;
    }
    ranges
}

fn hash_triple(data: &[u8], i: usize) -> usize {
    let v = ((data[i] as u32) << 16) ^ ((data[i + 1] as u32) << 8) ^ (data[i + 2] as u32);
    (v.wrapping_mul(0x1E35_A7BD) >> (32 - HASH_BITS)) as usize
}

fn common_prefix(data: &[u8], a: usize, b: usize, limit: usize) -> usize {
    let mut l = 0usize;
    while l < limit && data[a + l] == data[b + l] {
        l += 1;
    }
    l
}

// Greedy longest-match LZ77 via a 3-byte hash chain, ties broken toward the
// smaller distance. Matches never cross chunk boundaries, which is what
// keeps chunks independent.
fn tokenize(data: &[u8]) -> Vec<LzOp> {
    let n = data.len();
    if n == 0 {
        return Vec::new();
    }

    let mut head = vec![-1_i32; HASH_SIZE];
    let mut prev = vec![-1_i32; n];
    let mut ops = Vec::with_capacity(n / 2);

    let mut i = 0usize;
    while i < n {
        if i + MIN_MATCH > n {
            ops.push(LzOp::Literal(data[i]));
            i += 1;
            continue;
        }

        let h = hash_triple(data, i);
        let mut cand = head[h];
        prev[i] = cand;
        head[h] = i as i32;

        let mut best_len = 0usize;
        let mut best_dist = 0usize;
        let mut steps = 0usize;

        while cand >= 0 && steps < MAX_CHAIN_STEPS {
            let c = cand as usize;
            let dist = i - c;
            if dist > MAX_DISTANCE {
                break;
            }

            if data[c] == data[i] && data[c + 1] == data[i + 1] && data[c + 2] == data[i + 2] {
                let limit = MAX_MATCH.min(n - i);
                let len = common_prefix(data, c, i, limit);
                if len >= MIN_MATCH && (len > best_len || (len == best_len && dist < best_dist)) {
                    best_len = len;
                    best_dist = dist;
                    if best_len == MAX_MATCH {
                        break;
                    }
                }
            }

            cand = prev[c];
            steps += 1;
        }

        if best_len >= MIN_MATCH {
            ops.push(LzOp::Match {
                len: best_len as u16,
                dist: best_dist as u16,
            });

            // Positions covered by the match still enter the hash chains
            // so later matches can anchor inside it.
            let end = (i + best_len).min(n);
            let mut j = i + 1;
            while j < end {
                if j + MIN_MATCH <= n {
                    let hj = hash_triple(data, j);
                    prev[j] = head[hj];
                    head[hj] = j as i32;
                }
                j += 1;
            }

            i += best_len;
        } else {
            ops.push(LzOp::Literal(data[i]));
            i += 1;
        }
    }

    ops
}

fn reverse_bits(mut value: u16, len: u8) -> u16 {
    let mut out = 0u16;
    for _ in 0..len {
        out = (out << 1) | (value & 1);
        value >>= 1;
    }
    out
}

// Fixed literal/length codes, RFC 1951 3.2.6.
fn fixed_litlen_code(sym: u16) -> (u16, u8) {
    match sym {
        0..=143 => (0x30 + sym, 8),
        144..=255 => (0x190 + (sym - 144), 9),
        256..=279 => (sym - 256, 7),
        280..=287 => (0x0C0 + (sym - 280), 8),
        _ => (0, 0),
    }
}

fn put_litlen(bw: &mut BitWriter, sym: u16) {
    let (code, len) = fixed_litlen_code(sym);
    bw.push_bits(reverse_bits(code, len) as u32, len);
}

fn put_dist(bw: &mut BitWriter, sym: u16) {
    bw.push_bits(reverse_bits(sym, 5) as u32, 5);
}

// Maps a value onto its symbol index, extra-bit count, and extra-bit payload
// within a base/extra table pair.
fn symbol_for(value: usize, bases: &[usize], extras: &[u8]) -> (usize, u8, u16) {
    for (idx, (&base, &extra)) in bases.iter().zip(extras.iter()).enumerate() {
        let hi = if extra == 0 {
            base
        } else {
            base + ((1usize << extra) - 1)
        };
        if value <= hi {
            return (idx, extra, (value - base) as u16);
        }
    }
    (bases.len() - 1, 0, 0)
}

fn write_block(bw: &mut BitWriter, ops: &[LzOp], final_block: bool) {
    // BFINAL + BTYPE(01 = fixed Huffman), LSB-first.
    let header = (if final_block { 1u32 } else { 0u32 }) | (0b01 << 1);
    bw.push_bits(header, 3);

    for op in ops {
        match *op {
            LzOp::Literal(byte) => put_litlen(bw, byte as u16),
            LzOp::Match { len, dist } => {
                let (idx, extra, extra_val) = symbol_for(len as usize, &LENGTH_BASE, &LENGTH_EXTRA);
                put_litlen(bw, 257 + idx as u16);
                if extra > 0 {
                    bw.push_bits(extra_val as u32, extra);
                }

                let (idx, extra, extra_val) = symbol_for(dist as usize, &DIST_BASE, &DIST_EXTRA);
                put_dist(bw, idx as u16);
                if extra > 0 {
                    bw.push_bits(extra_val as u32, extra);
                }
            }
        }
    }

    put_litlen(bw, 256);
}

// One zlib member: header 0x78 0x01, fixed-Huffman deflate body, big-endian
// Adler-32 trailer. Chunks are planned in parallel and bit-packed serially,
// so output is identical regardless of thread count.
pub(crate) fn zlib_deflate(data: &[u8]) -> Vec<u8> {
    let plans: Vec<Vec<LzOp>> = split_ranges(data.len(), CHUNK_BYTES)
        .par_iter()
        .map(|&(start, end)| tokenize(&data[start..end]))
        .collect();

    let adler = adler32(data, ADLER_CHUNK_BYTES);

    // Worst case is 9 bits per literal plus per-block overhead.
    let mut bw = BitWriter::with_capacity(2 + data.len() + data.len() / 7 + 64);
    bw.out.extend_from_slice(&[0x78, 0x01]);

    let last = plans.len().saturating_sub(1);
    for (idx, plan) in plans.iter().enumerate() {
        write_block(&mut bw, plan, idx == last);
    }

    let mut out = bw.into_bytes();
    out.extend_from_slice(&adler.to_be_bytes());
    out
}
