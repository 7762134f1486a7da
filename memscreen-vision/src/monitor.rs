use xcap::Monitor;

/// Thin, `Send`-safe wrapper around `xcap::Monitor` exposing only the fields
/// the frame source needs, so callers never touch the underlying platform
/// handle directly.
#[derive(Debug, Clone)]
pub struct SafeMonitor {
    id: u32,
    name: String,
    width: u32,
    height: u32,
    is_primary: bool,
}

impl SafeMonitor {
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn is_primary(&self) -> bool {
        self.is_primary
    }
}

impl TryFrom<&Monitor> for SafeMonitor {
    type Error = xcap::XCapError;

    fn try_from(monitor: &Monitor) -> Result<Self, Self::Error> {
        Ok(Self {
            id: monitor.id()?,
            name: monitor.name()?,
            width: monitor.width()?,
            height: monitor.height()?,
            is_primary: monitor.is_primary()?,
        })
    }
}

pub fn list_monitors() -> Result<Vec<SafeMonitor>, xcap::XCapError> {
    Monitor::all()?.iter().map(SafeMonitor::try_from).collect()
}

pub fn monitor_by_id(id: u32) -> Result<Monitor, xcap::XCapError> {
    Monitor::all()?
        .into_iter()
        .find(|m| m.id().map(|mid| mid == id).unwrap_or(false))
        .ok_or_else(|| xcap::XCapError::new("no such monitor"))
}
