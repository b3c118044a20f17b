//! Merging per-process trace segments.
//!
//! The tracer writes one raw segment per traced process, named
//! `trace_all.<pid>`. The merged log holds every line of every segment except
//! the root invocation's own, prefixed with the segment's process id and
//! ordered by the tracer's wall-clock timestamps.
//!
//! The root is the lowest discovered process id unless the caller records it
//! explicitly. The lowest-id rule assumes ids are handed out in increasing
//! order within a session and breaks under pid wraparound.
//!
//! Trace timestamps carry only a time of day. Each is placed on a date
//! relative to the session start: a time more than an hour earlier than the
//! previous one (or than the start) belongs to the next day. Without a known
//! start, each segment's first line is taken at face value, so segments that
//! begin after midnight are misplaced.
//!
//! Segments are already in time order, so they are merged as streams.

use crate::log_root::run_started;
use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap, VecDeque};
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

/// File name prefix of raw per-process segments.
pub const SEGMENT_PREFIX: &str = "trace_all";

/// File name of the merged log inside a run directory.
pub const MERGED_LOG: &str = "trace.txt";

const MERGED_TMP: &str = "trace.txt.tmp";

/// How far a timestamp may step back before it counts as a day rollover.
const ROLLOVER_SLACK_HOURS: i64 = 1;

/// Find every `trace_all.<pid>` segment in `dir`, keyed by process id.
///
/// Names with a non-numeric (or zero) suffix are ignored.
pub fn discover_segments(dir: &Path) -> io::Result<BTreeMap<u32, PathBuf>> {
    let mut segments = BTreeMap::new();

    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if let Some(pid) = segment_pid(name) {
            segments.insert(pid, entry.path());
        }
    }

    Ok(segments)
}

/// Parse the process id out of a segment file name.
pub fn segment_pid(name: &str) -> Option<u32> {
    let suffix = name.strip_prefix(SEGMENT_PREFIX)?.strip_prefix('.')?;
    if suffix.is_empty() || !suffix.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    suffix.parse::<u32>().ok().filter(|&pid| pid > 0)
}

/// Merge segments in `dir`, treating the lowest process id as the root.
///
/// The session start is read from the run directory's name.
///
/// Returns the merged log path, or `None` when there is nothing to merge or
/// the merge could not be put in place. Never fatal.
pub fn merge(dir: &Path) -> Option<PathBuf> {
    merge_at(dir, None, run_started(dir))
}

/// Merge segments in `dir`, excluding `root` (or the lowest id if `None`).
pub fn merge_excluding(dir: &Path, root: Option<u32>) -> Option<PathBuf> {
    merge_at(dir, root, run_started(dir))
}

/// Merge segments in `dir` for a session that started at `started`.
pub fn merge_at(dir: &Path, root: Option<u32>, started: Option<NaiveDateTime>) -> Option<PathBuf> {
    let segments = match discover_segments(dir) {
        Ok(segments) => segments,
        Err(e) => {
            tracing::warn!(dir = %dir.display(), error = %e, "cannot scan run directory");
            return None;
        }
    };

    let root = root.or_else(|| segments.keys().next().copied())?;
    tracing::debug!(root, segments = segments.len(), "merging trace segments");

    let tmp = dir.join(MERGED_TMP);
    let merged = dir.join(MERGED_LOG);

    let result = write_merged(&tmp, &segments, root, started)
        .and_then(|()| std::fs::rename(&tmp, &merged));
    match result {
        Ok(()) => Some(merged),
        Err(e) => {
            tracing::warn!(dir = %dir.display(), error = %e, "trace merge failed");
            let _ = std::fs::remove_file(&tmp);
            None
        }
    }
}

/// Ordering of one line: timestamped lines first, by time, then pid, then
/// position in the segment.
type LineKey = (bool, Option<NaiveDateTime>, u32, usize);

/// One line of one segment.
struct TracedLine {
    at: Option<NaiveDateTime>,
    pid: u32,
    seq: usize,
    bytes: Vec<u8>,
}

impl TracedLine {
    fn key(&self) -> LineKey {
        (self.at.is_none(), self.at, self.pid, self.seq)
    }
}

/// A segment read line by line, with every line dated.
struct Segment {
    pid: u32,
    reader: BufReader<File>,
    /// Where the next timestamp is placed relative to.
    anchor: Option<NaiveDateTime>,
    /// Inherited by lines without their own timestamp.
    last_at: Option<NaiveDateTime>,
    backlog: VecDeque<TracedLine>,
    seq: usize,
}

impl Segment {
    fn open(pid: u32, path: &Path, started: Option<NaiveDateTime>) -> io::Result<Self> {
        Ok(Self {
            pid,
            reader: BufReader::new(File::open(path)?),
            anchor: started,
            last_at: None,
            backlog: VecDeque::new(),
            seq: 0,
        })
    }

    fn next_line(&mut self) -> io::Result<Option<TracedLine>> {
        if let Some(line) = self.backlog.pop_front() {
            return Ok(Some(line));
        }
        let Some(bytes) = self.read_raw()? else {
            return Ok(None);
        };

        if let Some(time) = leading_timestamp(&bytes) {
            self.last_at = Some(self.place(time));
        } else if self.last_at.is_none() {
            return self.lead_in(bytes);
        }
        Ok(Some(self.line(bytes)))
    }

    /// Lines ahead of the segment's first timestamp take that timestamp.
    ///
    /// A segment with no timestamp at all is buffered whole and sorts last.
    fn lead_in(&mut self, first: Vec<u8>) -> io::Result<Option<TracedLine>> {
        let mut untimed = vec![first];
        let mut timed = None;

        while let Some(bytes) = self.read_raw()? {
            if let Some(time) = leading_timestamp(&bytes) {
                self.last_at = Some(self.place(time));
                timed = Some(bytes);
                break;
            }
            untimed.push(bytes);
        }

        for bytes in untimed.into_iter().chain(timed) {
            let line = self.line(bytes);
            self.backlog.push_back(line);
        }
        Ok(self.backlog.pop_front())
    }

    fn place(&mut self, time: NaiveTime) -> NaiveDateTime {
        let at = match self.anchor {
            Some(anchor) => {
                let at = anchor.date().and_time(time);
                if at + Duration::hours(ROLLOVER_SLACK_HOURS) < anchor {
                    at + Duration::days(1)
                } else {
                    at
                }
            }
            None => NaiveDate::default().and_time(time),
        };
        self.anchor = Some(at);
        at
    }

    fn line(&mut self, bytes: Vec<u8>) -> TracedLine {
        let line = TracedLine {
            at: self.last_at,
            pid: self.pid,
            seq: self.seq,
            bytes,
        };
        self.seq += 1;
        line
    }

    /// The next raw line without its terminator.
    fn read_raw(&mut self) -> io::Result<Option<Vec<u8>>> {
        let mut buf = Vec::new();
        if self.reader.read_until(b'\n', &mut buf)? == 0 {
            return Ok(None);
        }
        if buf.last() == Some(&b'\n') {
            buf.pop();
        }
        Ok(Some(buf))
    }
}

/// Pull the next line, ending the segment on a read error.
fn pull(segment: &mut Segment) -> Option<TracedLine> {
    match segment.next_line() {
        Ok(line) => line,
        Err(e) => {
            tracing::warn!(pid = segment.pid, error = %e, "truncating unreadable segment");
            None
        }
    }
}

fn write_merged(
    tmp: &Path,
    segments: &BTreeMap<u32, PathBuf>,
    root: u32,
    started: Option<NaiveDateTime>,
) -> io::Result<()> {
    let mut open = Vec::new();
    for (&pid, path) in segments.iter().filter(|(pid, _)| **pid != root) {
        match Segment::open(pid, path, started) {
            Ok(segment) => open.push(segment),
            // A segment that vanished or is unreadable is skipped, not fatal.
            Err(e) => tracing::warn!(pid, error = %e, "skipping unreadable segment"),
        }
    }

    let mut heads: Vec<Option<TracedLine>> = open.iter_mut().map(pull).collect();
    let mut queue: BinaryHeap<Reverse<(LineKey, usize)>> = heads
        .iter()
        .enumerate()
        .filter_map(|(index, head)| head.as_ref().map(|line| Reverse((line.key(), index))))
        .collect();

    let mut out = BufWriter::new(File::create(tmp)?);
    while let Some(Reverse((_, index))) = queue.pop() {
        let Some(line) = heads[index].take() else {
            continue;
        };
        write!(out, "{} ", line.pid)?;
        out.write_all(&line.bytes)?;
        out.write_all(b"\n")?;

        if let Some(next) = pull(&mut open[index]) {
            queue.push(Reverse((next.key(), index)));
            heads[index] = Some(next);
        }
    }
    out.flush()
}

/// The `HH:MM:SS.micros` token a `-tt` trace line starts with.
fn leading_timestamp(line: &[u8]) -> Option<NaiveTime> {
    let end = line.iter().position(|&b| b == b' ').unwrap_or(line.len());
    let token = std::str::from_utf8(&line[..end]).ok()?;
    NaiveTime::parse_from_str(token, "%H:%M:%S%.f").ok()
}
