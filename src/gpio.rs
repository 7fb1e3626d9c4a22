use std::sync::{PoisonError, RwLock, RwLockReadGuard};

use tracing::{debug, info};

use crate::{
    backend::{Backend, Connector, SystemConnector},
    board::BoardProfile,
    config::Config,
    errors::Result,
    line::Direction,
};

/// Lifecycle of a [`Gpio`] controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Uninitialized,
    Initialized,
    /// Cleaned up after having been initialized; a later `init` starts a new
    /// session
    Shutdown,
}

struct Session<B> {
    profile: BoardProfile,
    backend: B,
}

struct Inner<B> {
    session: Option<Session<B>>,
    shut_down: bool,
}

/// GPIO controller owning the hardware backend.
///
/// Only one controller should drive the hardware of a process; the free
/// functions at the crate root share a lazily created instance. The backend
/// is released on [`Gpio::cleanup`] or when the controller is dropped.
///
/// `init` and `cleanup` are exclusive with each other. Pin operations only
/// share the session, so they run concurrently; the backend decides how
/// much of the hardware access needs serializing.
///
/// ```no_run
/// use rpigpio::Gpio;
///
/// # fn main() -> rpigpio::Result<()> {
/// let gpio = Gpio::new();
/// gpio.set_output(17)?;
/// gpio.set_high(17)?;
/// assert!(gpio.read(17)?);
/// gpio.cleanup();
/// # Ok(()) }
/// ```
pub struct Gpio<C: Connector = SystemConnector> {
    connector: C,
    default_model: String,
    inner: RwLock<Inner<C::Backend>>,
}

impl Gpio {
    /// Controller configured from the environment (see [`Config::from_env`])
    pub fn new() -> Self {
        Self::with_config(Config::from_env())
    }

    pub fn with_config(config: Config) -> Self {
        let model = config.model().to_owned();
        Self::with_connector(SystemConnector::new(config), model)
    }
}

impl Default for Gpio {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Connector> Gpio<C> {
    /// Controller using `connector` for hardware access, initializing with
    /// `default_model` when a pin operation runs before `init`
    pub fn with_connector(connector: C, default_model: impl Into<String>) -> Self {
        Self {
            connector,
            default_model: default_model.into(),
            inner: RwLock::new(Inner {
                session: None,
                shut_down: false,
            }),
        }
    }

    /// Resolve the board and open the backend.
    ///
    /// Does nothing if already initialized. On failure the controller stays
    /// uninitialized.
    pub fn init(&self, model: &str) -> Result<()> {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if inner.session.is_some() {
            debug!("gpio already initialized");
            return Ok(());
        }

        let profile = BoardProfile::resolve(model, || self.connector.host())?;
        let backend = self.connector.connect(&profile)?;
        info!(model, profile = profile.name(), "gpio initialized");

        inner.session = Some(Session { profile, backend });
        inner.shut_down = false;
        Ok(())
    }

    /// Release the backend. Safe to call at any time, any number of times.
    pub fn cleanup(&self) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(session) = inner.session.take() {
            session.backend.close();
            inner.shut_down = true;
            info!(profile = session.profile.name(), "gpio cleaned up");
        }
    }

    pub fn state(&self) -> State {
        let inner = self.read_inner();
        match (&inner.session, inner.shut_down) {
            (Some(_), _) => State::Initialized,
            (None, true) => State::Shutdown,
            (None, false) => State::Uninitialized,
        }
    }

    /// Profile of the current session
    pub fn profile(&self) -> Option<BoardProfile> {
        self.read_inner().session.as_ref().map(|s| s.profile)
    }

    pub fn set_direction(&self, pin: u32, direction: Direction) -> Result<()> {
        self.with_backend(pin, |backend, offset| {
            backend.set_direction(offset, direction)
        })
    }

    pub fn set_input(&self, pin: u32) -> Result<()> {
        self.set_direction(pin, Direction::Input)
    }

    pub fn set_output(&self, pin: u32) -> Result<()> {
        self.set_direction(pin, Direction::Output)
    }

    pub fn set_high(&self, pin: u32) -> Result<()> {
        self.with_backend(pin, |backend, offset| backend.set_high(offset))
    }

    pub fn set_low(&self, pin: u32) -> Result<()> {
        self.with_backend(pin, |backend, offset| backend.set_low(offset))
    }

    pub fn set(&self, pin: u32, state: bool) -> Result<()> {
        if state {
            self.set_high(pin)
        } else {
            self.set_low(pin)
        }
    }

    pub fn read(&self, pin: u32) -> Result<bool> {
        self.with_backend(pin, |backend, offset| backend.read(offset))
    }

    fn read_inner(&self) -> RwLockReadGuard<'_, Inner<C::Backend>> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` against the session backend, initializing with the default
    /// model first if needed. The pin is validated before `f` runs.
    fn with_backend<T>(
        &self,
        pin: u32,
        f: impl FnOnce(&C::Backend, u32) -> Result<T>,
    ) -> Result<T> {
        loop {
            {
                let inner = self.read_inner();
                if let Some(session) = inner.session.as_ref() {
                    let offset = session.profile.offset(pin)?;
                    return f(&session.backend, offset);
                }
            }
            self.init(&self.default_model)?;
        }
    }
}

impl<C: Connector> Drop for Gpio<C> {
    fn drop(&mut self) {
        self.cleanup();
    }
}

impl<C: Connector> std::fmt::Debug for Gpio<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gpio")
            .field("default_model", &self.default_model)
            .field("state", &self.state())
            .field("profile", &self.profile())
            .finish()
    }
}

#[cfg(test)]
mod test {
    use std::sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering},
        Arc, Barrier,
    };

    use super::*;
    use crate::{
        backend::Registers,
        board::{Family, HostInfo},
        errors::{Error, ErrorCode},
    };

    #[derive(Default)]
    struct Counters {
        opens: AtomicUsize,
        closes: AtomicUsize,
        accesses: AtomicUsize,
    }

    /// Pin levels and directions kept in memory, behaving like real outputs
    struct FakeBackend {
        counters: Arc<Counters>,
        levels: AtomicU64,
        outputs: AtomicU64,
    }

    impl FakeBackend {
        fn touch(&self) {
            self.counters.accesses.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl Backend for FakeBackend {
        fn set_direction(&self, offset: u32, direction: Direction) -> Result<()> {
            self.touch();
            match direction {
                Direction::Output => self.outputs.fetch_or(1 << offset, Ordering::SeqCst),
                Direction::Input => self.outputs.fetch_and(!(1 << offset), Ordering::SeqCst),
            };
            Ok(())
        }

        fn set_high(&self, offset: u32) -> Result<()> {
            self.touch();
            self.outputs.fetch_or(1 << offset, Ordering::SeqCst);
            self.levels.fetch_or(1 << offset, Ordering::SeqCst);
            Ok(())
        }

        fn set_low(&self, offset: u32) -> Result<()> {
            self.touch();
            self.outputs.fetch_or(1 << offset, Ordering::SeqCst);
            self.levels.fetch_and(!(1 << offset), Ordering::SeqCst);
            Ok(())
        }

        fn read(&self, offset: u32) -> Result<bool> {
            self.touch();
            Ok(self.levels.load(Ordering::SeqCst) & (1 << offset) != 0)
        }

        fn close(self) {
            self.counters.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct FakeConnector {
        counters: Arc<Counters>,
        arch: &'static str,
        pi5: bool,
        fail: Option<fn() -> Error>,
    }

    impl FakeConnector {
        fn new(arch: &'static str) -> Self {
            Self {
                counters: Arc::default(),
                arch,
                pi5: false,
                fail: None,
            }
        }
    }

    impl Connector for FakeConnector {
        type Backend = FakeBackend;

        fn connect(&self, _profile: &BoardProfile) -> Result<FakeBackend> {
            if let Some(fail) = self.fail {
                return Err(fail());
            }
            self.counters.opens.fetch_add(1, Ordering::SeqCst);
            Ok(FakeBackend {
                counters: self.counters.clone(),
                levels: AtomicU64::new(0),
                outputs: AtomicU64::new(0),
            })
        }

        fn host(&self) -> HostInfo {
            HostInfo {
                arch: self.arch.to_owned(),
                pi5_chip_present: self.pi5,
                pointer_width: 64,
            }
        }
    }

    fn gpio() -> (Gpio<FakeConnector>, Arc<Counters>) {
        let connector = FakeConnector::new("aarch64");
        let counters = connector.counters.clone();
        (Gpio::with_connector(connector, "auto"), counters)
    }

    #[test]
    fn starts_uninitialized() {
        let (gpio, counters) = gpio();
        assert_eq!(gpio.state(), State::Uninitialized);
        assert_eq!(gpio.profile(), None);
        assert_eq!(counters.opens.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn init_is_idempotent() {
        let (gpio, counters) = gpio();
        gpio.init("auto").unwrap();
        gpio.init("auto").unwrap();
        assert_eq!(gpio.state(), State::Initialized);
        assert_eq!(counters.opens.load(Ordering::SeqCst), 1);
        assert_eq!(gpio.profile().unwrap().name(), "linux-aarch64");
    }

    #[test]
    fn auto_detects_pi5() {
        let connector = FakeConnector {
            pi5: true,
            ..FakeConnector::new("aarch64")
        };
        let gpio = Gpio::with_connector(connector, "auto");
        gpio.init("auto").unwrap();
        assert_eq!(gpio.profile().unwrap().family(), Family::Arm64Pi5);
    }

    #[test]
    fn cleanup_twice_is_noop() {
        let (gpio, counters) = gpio();
        gpio.cleanup();
        assert_eq!(gpio.state(), State::Uninitialized);

        gpio.init("auto").unwrap();
        gpio.cleanup();
        gpio.cleanup();
        assert_eq!(gpio.state(), State::Shutdown);
        assert_eq!(counters.closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn reinit_after_cleanup() {
        let (gpio, counters) = gpio();
        gpio.init("auto").unwrap();
        gpio.cleanup();
        gpio.init("auto").unwrap();
        assert_eq!(gpio.state(), State::Initialized);

        gpio.set_output(4).unwrap();
        gpio.set_high(4).unwrap();
        assert!(gpio.read(4).unwrap());
        assert_eq!(counters.opens.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn operations_initialize_implicitly() {
        let (gpio, counters) = gpio();
        gpio.set_high(17).unwrap();
        assert_eq!(gpio.state(), State::Initialized);
        assert_eq!(counters.opens.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn write_then_read_every_pin() {
        let (gpio, _) = gpio();
        gpio.init("linux-armv7").unwrap();
        let pins = gpio.profile().unwrap().pin_count();
        for pin in 0..pins {
            gpio.set_high(pin).unwrap();
            assert!(gpio.read(pin).unwrap(), "pin {pin} high");
            gpio.set_low(pin).unwrap();
            assert!(!gpio.read(pin).unwrap(), "pin {pin} low");
            gpio.set(pin, true).unwrap();
            assert!(gpio.read(pin).unwrap());
        }
    }

    #[test]
    fn out_of_range_pins_never_reach_backend() {
        let (gpio, counters) = gpio();
        gpio.init("pi5").unwrap();
        let limit = gpio.profile().unwrap().pin_count();

        for pin in [limit, limit + 1, 63, u32::MAX] {
            let errs = [
                gpio.set_direction(pin, Direction::Output).unwrap_err(),
                gpio.set_high(pin).unwrap_err(),
                gpio.set_low(pin).unwrap_err(),
                gpio.read(pin).unwrap_err(),
            ];
            for err in errs {
                assert!(matches!(err, Error::Offset(p) if p == pin));
                assert_eq!(err.code(), Some(ErrorCode::Offset));
            }
        }
        assert_eq!(counters.accesses.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn failed_init_keeps_state() {
        fn refuse() -> Error {
            Error::DevMem {
                path: "/dev/mem".into(),
                source: std::io::Error::from_raw_os_error(libc::EACCES),
            }
        }

        let connector = FakeConnector {
            fail: Some(refuse as fn() -> Error),
            ..FakeConnector::new("aarch64")
        };
        let gpio = Gpio::with_connector(connector, "auto");
        let err = gpio.init("auto").unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::DevMem));
        assert_eq!(gpio.state(), State::Uninitialized);
        assert!(gpio.set_high(1).is_err());
        assert_eq!(gpio.state(), State::Uninitialized);
    }

    #[test]
    fn unsupported_architecture() {
        let gpio = Gpio::with_connector(FakeConnector::new("x86_64"), "auto");
        let err = gpio.read(0).unwrap_err();
        assert!(matches!(err, Error::UnsupportedArchitecture(_)));
        assert_eq!(err.code(), None);
        assert_eq!(gpio.state(), State::Uninitialized);
    }

    #[test]
    fn unknown_model() {
        let (gpio, counters) = gpio();
        assert!(matches!(gpio.init("pi99"), Err(Error::UnknownModel(_))));
        assert_eq!(counters.opens.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn concurrent_init_opens_once() {
        let (gpio, counters) = gpio();
        let barrier = Barrier::new(8);
        std::thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    barrier.wait();
                    gpio.init("auto").unwrap();
                    assert_eq!(gpio.state(), State::Initialized);
                });
            }
        });
        assert_eq!(counters.opens.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn concurrent_toggling() {
        let (gpio, _) = gpio();
        gpio.init("linux-armv7").unwrap();
        std::thread::scope(|s| {
            for pin in 0..16 {
                let gpio = &gpio;
                s.spawn(move || {
                    for i in 0..100 {
                        gpio.set(pin, i % 2 == 0).unwrap();
                    }
                    gpio.set_high(pin).unwrap();
                });
            }
        });
        for pin in 0..16 {
            assert!(gpio.read(pin).unwrap());
        }
    }

    #[test]
    fn drop_releases_backend() {
        let (gpio, counters) = gpio();
        gpio.init("auto").unwrap();
        drop(gpio);
        assert_eq!(counters.closes.load(Ordering::SeqCst), 1);
    }

    struct RegisterConnector;

    impl Connector for RegisterConnector {
        type Backend = Registers;

        fn connect(&self, _profile: &BoardProfile) -> Result<Registers> {
            Ok(Registers::in_memory())
        }

        fn host(&self) -> HostInfo {
            HostInfo {
                arch: "armv7l".to_owned(),
                pi5_chip_present: false,
                pointer_width: 32,
            }
        }
    }

    #[test]
    fn register_backend_through_controller() {
        let gpio = Gpio::with_connector(RegisterConnector, "auto");
        gpio.set_output(17).unwrap();
        gpio.set_high(17).unwrap();
        assert_eq!(gpio.profile().unwrap().family(), Family::Armv7);
        assert!(matches!(gpio.set_high(54), Err(Error::Offset(54))));
    }

    #[test]
    fn register_backend_drives_pin_without_direction() {
        let gpio = Gpio::with_connector(RegisterConnector, "auto");
        gpio.set_high(4).unwrap();

        let inner = gpio.read_inner();
        let regs = &inner.session.as_ref().unwrap().backend;
        // GPFSEL0 holds pin 4 at bits 12..15, GPSET0 is word 7
        assert_eq!((regs.peek(0) >> 12) & 0b111, 0b001);
        assert_eq!(regs.peek(7), 1 << 4);
    }
}
