//! Character-level Myers diff.
//!
//! [`diff`] returns the edit script turning `base` into `other` as a list of
//! [`Hunk`]s over base coordinates, in order and never touching each other:
//! between two hunks there is always at least one unchanged character.

/// Above this many edits the script collapses to a single replacement of the
/// differing middle section.
const MAX_EDITS: usize = 1024;

/// Replace `base[start..end]` with `insert`. `start == end` is a pure insert,
/// an empty `insert` a pure delete.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Hunk {
    pub start: usize,
    pub end: usize,
    pub insert: Vec<char>,
}

impl Hunk {
    pub fn is_insert(&self) -> bool {
        self.start == self.end
    }

    pub fn is_delete(&self) -> bool {
        self.insert.is_empty()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Op {
    Equal,
    Delete,
    Insert(usize),
}

pub fn diff(base: &[char], other: &[char]) -> Vec<Hunk> {
    let prefix = base
        .iter()
        .zip(other)
        .take_while(|(a, b)| a == b)
        .count();
    let suffix = base[prefix..]
        .iter()
        .rev()
        .zip(other[prefix..].iter().rev())
        .take_while(|(a, b)| a == b)
        .count();
    let a = &base[prefix..base.len() - suffix];
    let b = &other[prefix..other.len() - suffix];

    if a.is_empty() && b.is_empty() {
        return Vec::new();
    }
    let whole = || {
        vec![Hunk {
            start: prefix,
            end: prefix + a.len(),
            insert: b.to_vec(),
        }]
    };
    if a.is_empty() || b.is_empty() {
        return whole();
    }
    match shortest_edit(a, b) {
        Some(ops) => hunks(&ops, b, prefix),
        None => whole(),
    }
}

/// Myers' greedy forward search. `None` once the edit distance passes
/// [`MAX_EDITS`].
fn shortest_edit(a: &[char], b: &[char]) -> Option<Vec<Op>> {
    let n = a.len() as isize;
    let m = b.len() as isize;
    let max = n + m;
    let limit = max.min(MAX_EDITS as isize);
    let offset = max + 1;
    let mut v = vec![0isize; (2 * max + 3) as usize];
    // trace[d] holds V[-d..=d] as it stood after step d.
    let mut trace: Vec<Vec<isize>> = Vec::new();

    for d in 0..=limit {
        for k in (-d..=d).step_by(2) {
            let idx = (k + offset) as usize;
            let mut x = if k == -d || (k != d && v[idx - 1] < v[idx + 1]) {
                v[idx + 1]
            } else {
                v[idx - 1] + 1
            };
            let mut y = x - k;
            while x < n && y < m && a[x as usize] == b[y as usize] {
                x += 1;
                y += 1;
            }
            v[idx] = x;
            if x >= n && y >= m {
                trace.push(v[(offset - d) as usize..=(offset + d) as usize].to_vec());
                return Some(backtrack(&trace, n, m));
            }
        }
        trace.push(v[(offset - d) as usize..=(offset + d) as usize].to_vec());
    }
    None
}

fn backtrack(trace: &[Vec<isize>], n: isize, m: isize) -> Vec<Op> {
    let mut ops = Vec::new();
    let (mut x, mut y) = (n, m);

    for d in (1..trace.len() as isize).rev() {
        let prev = &trace[(d - 1) as usize];
        let at = |k: isize| prev[(k + d - 1) as usize];
        let k = x - y;
        let prev_k = if k == -d || (k != d && at(k - 1) < at(k + 1)) {
            k + 1
        } else {
            k - 1
        };
        let prev_x = at(prev_k);
        let prev_y = prev_x - prev_k;

        while x > prev_x && y > prev_y {
            ops.push(Op::Equal);
            x -= 1;
            y -= 1;
        }
        if prev_k == k + 1 {
            ops.push(Op::Insert(prev_y as usize));
        } else {
            ops.push(Op::Delete);
        }
        x = prev_x;
        y = prev_y;
    }
    for _ in 0..x {
        ops.push(Op::Equal);
    }
    ops.reverse();
    ops
}

fn hunks(ops: &[Op], b: &[char], offset: usize) -> Vec<Hunk> {
    let mut out = Vec::new();
    let mut current: Option<Hunk> = None;
    let mut pos = offset;

    for op in ops {
        match op {
            Op::Equal => {
                out.extend(current.take());
                pos += 1;
            }
            Op::Delete => {
                let hunk = current.get_or_insert_with(|| Hunk {
                    start: pos,
                    end: pos,
                    insert: Vec::new(),
                });
                pos += 1;
                hunk.end = pos;
            }
            Op::Insert(j) => {
                current
                    .get_or_insert_with(|| Hunk {
                        start: pos,
                        end: pos,
                        insert: Vec::new(),
                    })
                    .insert
                    .push(b[*j]);
            }
        }
    }
    out.extend(current);
    out
}

/// Apply non-overlapping, ordered hunks to `base`.
pub fn apply(base: &[char], hunks: &[Hunk]) -> String {
    let mut out = String::with_capacity(base.len());
    let mut pos = 0;
    for hunk in hunks {
        out.extend(&base[pos..hunk.start]);
        out.extend(&hunk.insert);
        pos = hunk.end;
    }
    out.extend(&base[pos..]);
    out
}
