//! Access through the GPIO character device, used where the registers are
//! not directly reachable (Raspberry Pi 5).

use std::{
    io,
    sync::{Mutex, MutexGuard, PoisonError},
};

use tracing::debug;

use crate::{
    backend::Backend,
    chip::{self, Chip},
    config::Config,
    errors::{Error, GpiodOp, Result},
    fixed_str::FixedStr,
    line::{Direction, LineHandle},
    uapi,
};

/// Label of the RP1 GPIO bank on a Pi 5
pub const RP1_LABEL: &str = "pinctrl-rp1";

/// Something single lines can be requested from, normally a [`Chip`]
pub trait LineSource: Send + Sync {
    type Line: RequestedLine;

    /// Request `offset` with a fixed `direction`; outputs start at `initial`
    fn request_line(
        &self,
        consumer: &str,
        offset: u32,
        direction: Direction,
        initial: bool,
    ) -> io::Result<Self::Line>;
}

/// A held line, released on drop
pub trait RequestedLine: Send {
    fn direction(&self) -> Direction;

    fn get_value(&self) -> io::Result<bool>;

    fn set_value(&self, value: bool) -> io::Result<()>;
}

impl LineSource for Chip {
    type Line = LineHandle;

    fn request_line(
        &self,
        consumer: &str,
        offset: u32,
        direction: Direction,
        initial: bool,
    ) -> io::Result<LineHandle> {
        Chip::request_line(self, consumer, offset, direction, initial)
    }
}

impl RequestedLine for LineHandle {
    fn direction(&self) -> Direction {
        LineHandle::direction(self)
    }

    fn get_value(&self) -> io::Result<bool> {
        LineHandle::get_value(self)
    }

    fn set_value(&self, value: bool) -> io::Result<()> {
        LineHandle::set_value(self, value)
    }
}

type LineMap<L> = heapless::FnvIndexMap<u32, L, { uapi::v2::GPIO_LINES_MAX }>;

/// Lazily requested lines on one GPIO chip.
///
/// A line keeps the direction it was requested with, so changing direction
/// releases the handle and requests the line again.
pub struct LineCache<S: LineSource = Chip> {
    source: S,
    num_lines: u32,
    consumer: FixedStr<{ uapi::v2::GPIO_MAX_NAME_SIZE }>,
    lines: Mutex<LineMap<S::Line>>,
}

impl LineCache {
    /// Open the configured chip, or the RP1 bank wherever it was enumerated
    /// if the configured node does not exist.
    pub fn open(config: &Config) -> Result<Self> {
        let chip = match Chip::open(config.gpiochip()) {
            Ok(chip) => chip,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                debug!(path = %config.gpiochip().display(), "gpio chip missing, searching by label");
                chip::find_chip(RP1_LABEL)
                    .map_err(Error::gpiod(GpiodOp::OpenChip))?
                    .ok_or_else(|| Error::Gpiod {
                        op: GpiodOp::OpenChip,
                        source: err,
                    })?
            }
            Err(err) => return Err(Error::gpiod(GpiodOp::OpenChip)(err)),
        };

        let info = chip.info().map_err(Error::gpiod(GpiodOp::ChipInfo))?;
        debug!(path = %chip.path().display(), ?info, "opened gpio chip");
        Self::new(chip, info.num_lines(), config.consumer())
    }
}

impl<S: LineSource> LineCache<S> {
    pub fn new(source: S, num_lines: u32, consumer: &str) -> Result<Self> {
        let consumer =
            FixedStr::new(consumer).map_err(|e| Error::gpiod(GpiodOp::OpenChip)(e.into()))?;
        Ok(Self {
            source,
            num_lines,
            consumer,
            lines: Mutex::new(LineMap::new()),
        })
    }

    fn lines(&self) -> MutexGuard<'_, LineMap<S::Line>> {
        self.lines.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check(&self, offset: u32) -> Result<()> {
        if offset < self.num_lines && (offset as usize) < uapi::v2::GPIO_LINES_MAX {
            Ok(())
        } else {
            Err(Error::Offset(offset))
        }
    }

    /// Make sure `offset` is held with `direction`, requesting it again if
    /// needed. An input switched to output starts at its last sampled level
    /// unless `initial` says otherwise.
    fn ensure<'a>(
        &self,
        lines: &'a mut LineMap<S::Line>,
        offset: u32,
        direction: Direction,
        initial: Option<bool>,
    ) -> Result<&'a S::Line> {
        let held = lines.get(&offset).map(RequestedLine::direction);
        if held != Some(direction) {
            let previous = lines.remove(&offset);
            let level = match initial {
                Some(level) => level,
                None => {
                    direction.is_output()
                        && previous
                            .as_ref()
                            .and_then(|line| line.get_value().ok())
                            .unwrap_or(false)
                }
            };
            // The old handle has to be released before the line can be requested again
            drop(previous);

            let line = self
                .source
                .request_line(&self.consumer, offset, direction, level)
                .map_err(Error::gpiod(GpiodOp::RequestLine))?;
            if lines.insert(offset, line).is_err() {
                // Offsets are bounded by GPIO_LINES_MAX, which is the map capacity
                return Err(Error::Offset(offset));
            }
        }

        lines.get(&offset).ok_or(Error::Offset(offset))
    }

    fn write(&self, offset: u32, value: bool) -> Result<()> {
        self.check(offset)?;
        let mut lines = self.lines();
        let held_output =
            lines.get(&offset).map(RequestedLine::direction) == Some(Direction::Output);
        if held_output {
            let line = lines.get(&offset).ok_or(Error::Offset(offset))?;
            line.set_value(value)
                .map_err(Error::gpiod(GpiodOp::SetValue))
        } else {
            // Requesting with the level drives it without a separate write
            self.ensure(&mut lines, offset, Direction::Output, Some(value))
                .map(drop)
        }
    }

    /// Number of lines currently requested
    pub fn requested(&self) -> usize {
        self.lines().len()
    }
}

impl<S: LineSource> Backend for LineCache<S> {
    fn set_direction(&self, offset: u32, direction: Direction) -> Result<()> {
        self.check(offset)?;
        let mut lines = self.lines();
        self.ensure(&mut lines, offset, direction, None).map(drop)
    }

    fn set_high(&self, offset: u32) -> Result<()> {
        self.write(offset, true)
    }

    fn set_low(&self, offset: u32) -> Result<()> {
        self.write(offset, false)
    }

    fn read(&self, offset: u32) -> Result<bool> {
        self.check(offset)?;
        let mut lines = self.lines();
        if !lines.contains_key(&offset) {
            self.ensure(&mut lines, offset, Direction::Input, None)?;
        }
        let line = lines.get(&offset).ok_or(Error::Offset(offset))?;
        line.get_value().map_err(Error::gpiod(GpiodOp::GetValue))
    }
}

impl<S: LineSource> Drop for LineCache<S> {
    fn drop(&mut self) {
        let released = self.requested();
        debug!(released, consumer = %self.consumer, "releasing gpio lines");
    }
}

impl<S: LineSource> std::fmt::Debug for LineCache<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LineCache")
            .field("num_lines", &self.num_lines)
            .field("consumer", &self.consumer)
            .field("requested", &self.requested())
            .finish()
    }
}

#[cfg(test)]
mod test {
    use std::sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    };

    use super::*;
    use crate::errors::ErrorCode;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Event {
        Request {
            offset: u32,
            direction: Direction,
            initial: bool,
        },
        Release(u32),
    }

    /// Records requests and releases; `inputs` holds the level seen on each
    /// line while it is an input
    #[derive(Default)]
    struct Bench {
        events: Mutex<Vec<Event>>,
        inputs: AtomicU64,
        busy: Option<u32>,
    }

    impl Bench {
        fn events(&self) -> Vec<Event> {
            self.events.lock().unwrap().clone()
        }

        fn record(&self, event: Event) {
            self.events.lock().unwrap().push(event);
        }
    }

    struct FakeLine {
        bench: Arc<Bench>,
        offset: u32,
        direction: Direction,
        level: AtomicBool,
    }

    impl RequestedLine for FakeLine {
        fn direction(&self) -> Direction {
            self.direction
        }

        fn get_value(&self) -> io::Result<bool> {
            Ok(match self.direction {
                Direction::Output => self.level.load(Ordering::SeqCst),
                Direction::Input => {
                    self.bench.inputs.load(Ordering::SeqCst) & (1 << self.offset) != 0
                }
            })
        }

        fn set_value(&self, value: bool) -> io::Result<()> {
            if !self.direction.is_output() {
                return Err(io::Error::from_raw_os_error(libc::EPERM));
            }
            self.level.store(value, Ordering::SeqCst);
            Ok(())
        }
    }

    impl Drop for FakeLine {
        fn drop(&mut self) {
            self.bench.record(Event::Release(self.offset));
        }
    }

    struct FakeChip(Arc<Bench>);

    impl LineSource for FakeChip {
        type Line = FakeLine;

        fn request_line(
            &self,
            consumer: &str,
            offset: u32,
            direction: Direction,
            initial: bool,
        ) -> io::Result<FakeLine> {
            assert_eq!(consumer, "test");
            if self.0.busy == Some(offset) {
                return Err(io::Error::from_raw_os_error(libc::EBUSY));
            }
            self.0.record(Event::Request {
                offset,
                direction,
                initial,
            });
            Ok(FakeLine {
                bench: self.0.clone(),
                offset,
                direction,
                level: AtomicBool::new(initial),
            })
        }
    }

    fn cache_with(bench: Bench) -> (LineCache<FakeChip>, Arc<Bench>) {
        let bench = Arc::new(bench);
        let cache = LineCache::new(FakeChip(bench.clone()), 28, "test").unwrap();
        (cache, bench)
    }

    fn cache() -> (LineCache<FakeChip>, Arc<Bench>) {
        cache_with(Bench::default())
    }

    fn request(offset: u32, direction: Direction, initial: bool) -> Event {
        Event::Request {
            offset,
            direction,
            initial,
        }
    }

    #[test]
    fn read_requests_input_once() {
        let (cache, bench) = cache();
        bench.inputs.store(1 << 3, Ordering::SeqCst);
        assert!(cache.read(3).unwrap());
        assert!(cache.read(3).unwrap());
        assert!(!cache.read(2).unwrap());

        assert_eq!(
            bench.events(),
            [
                request(3, Direction::Input, false),
                request(2, Direction::Input, false)
            ]
        );
        assert_eq!(cache.requested(), 2);
    }

    #[test]
    fn write_requests_output_with_level() {
        let (cache, bench) = cache();
        cache.set_high(5).unwrap();
        assert!(cache.read(5).unwrap());

        cache.set_low(5).unwrap();
        assert!(!cache.read(5).unwrap());

        assert_eq!(bench.events(), [request(5, Direction::Output, true)]);
    }

    #[test]
    fn same_direction_keeps_handle() {
        let (cache, bench) = cache();
        cache.set_direction(2, Direction::Output).unwrap();
        cache.set_direction(2, Direction::Output).unwrap();
        assert_eq!(bench.events(), [request(2, Direction::Output, false)]);
    }

    #[test]
    fn direction_change_carries_sampled_level() {
        let (cache, bench) = cache();
        bench.inputs.store(1 << 7, Ordering::SeqCst);
        cache.set_direction(7, Direction::Input).unwrap();
        cache.set_direction(7, Direction::Output).unwrap();
        assert!(cache.read(7).unwrap());

        // the input is released before the line is requested again
        assert_eq!(
            bench.events(),
            [
                request(7, Direction::Input, false),
                Event::Release(7),
                request(7, Direction::Output, true)
            ]
        );
        assert_eq!(cache.requested(), 1);
    }

    #[test]
    fn write_to_input_requests_output() {
        let (cache, bench) = cache();
        cache.set_direction(4, Direction::Input).unwrap();
        cache.set_high(4).unwrap();
        cache.set_direction(4, Direction::Input).unwrap();

        assert_eq!(
            bench.events(),
            [
                request(4, Direction::Input, false),
                Event::Release(4),
                request(4, Direction::Output, true),
                Event::Release(4),
                request(4, Direction::Input, false)
            ]
        );
    }

    #[test]
    fn offsets_checked_against_chip() {
        let (cache, bench) = cache();
        for offset in [28, 63, 64, u32::MAX] {
            assert!(matches!(cache.read(offset), Err(Error::Offset(o)) if o == offset));
            assert!(matches!(cache.set_high(offset), Err(Error::Offset(_))));
            assert!(matches!(
                cache.set_direction(offset, Direction::Output),
                Err(Error::Offset(_))
            ));
        }
        assert!(bench.events().is_empty());
    }

    #[test]
    fn request_failure_is_gpiod_error() {
        let (cache, _) = cache_with(Bench {
            busy: Some(9),
            ..Bench::default()
        });
        let err = cache.set_high(9).unwrap_err();
        assert!(matches!(
            err,
            Error::Gpiod {
                op: GpiodOp::RequestLine,
                ..
            }
        ));
        assert_eq!(err.code(), Some(ErrorCode::Gpiod));
        assert_eq!(cache.requested(), 0);
    }

    #[test]
    fn close_releases_every_line() {
        let (cache, bench) = cache();
        cache.set_high(1).unwrap();
        cache.read(2).unwrap();
        cache.close();

        let events = bench.events();
        assert!(events.contains(&Event::Release(1)));
        assert!(events.contains(&Event::Release(2)));
        assert_eq!(events.len(), 4);
    }

    #[test]
    fn consumer_must_fit() {
        let bench = Arc::new(Bench::default());
        let long = "x".repeat(uapi::v2::GPIO_MAX_NAME_SIZE);
        let err = LineCache::new(FakeChip(bench), 28, &long).unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::Gpiod));
    }
}
