//! Hardware trigger output.
//!
//! A short high pulse on a GPIO line is wired to the receiver's event input,
//! which answers with an ExtEventPVTGeodetic block timestamped at the pulse.

use std::time::Duration;

use crate::config::TriggerSettings;
use crate::error::{AcquisitionError, Device};

pub trait Trigger {
    /// Drive the line high for the configured width, then low.
    fn pulse(&mut self) -> Result<(), AcquisitionError>;

    fn is_enabled(&self) -> bool {
        true
    }
}

/// Used when no trigger pin is configured.
#[derive(Debug, Default)]
pub struct DisabledTrigger;

impl Trigger for DisabledTrigger {
    fn pulse(&mut self) -> Result<(), AcquisitionError> {
        Ok(())
    }

    fn is_enabled(&self) -> bool {
        false
    }
}

#[cfg(feature = "trigger-rppal")]
pub struct GpioTrigger {
    pin: rppal::gpio::OutputPin,
    width: Duration,
}

#[cfg(feature = "trigger-rppal")]
impl GpioTrigger {
    pub fn open(bcm_pin: u8, width: Duration) -> Result<Self, AcquisitionError> {
        let gpio = rppal::gpio::Gpio::new()
            .map_err(|err| AcquisitionError::unavailable(Device::Trigger, err))?;
        let pin = gpio
            .get(bcm_pin)
            .map_err(|err| AcquisitionError::unavailable(Device::Trigger, err))?
            .into_output_low();
        log::info!("trigger: GPIO{} configured low", bcm_pin);
        Ok(Self { pin, width })
    }
}

#[cfg(feature = "trigger-rppal")]
impl Trigger for GpioTrigger {
    fn pulse(&mut self) -> Result<(), AcquisitionError> {
        self.pin.set_high();
        std::thread::sleep(self.width);
        self.pin.set_low();
        Ok(())
    }
}

/// Open the configured trigger, or a disabled one when no pin is set.
pub fn open_trigger(settings: &TriggerSettings) -> Result<Box<dyn Trigger>, AcquisitionError> {
    let Some(pin) = settings.pin else {
        return Ok(Box::new(DisabledTrigger));
    };
    open_gpio(pin, settings.pulse_width)
}

#[cfg(feature = "trigger-rppal")]
fn open_gpio(pin: u8, width: Duration) -> Result<Box<dyn Trigger>, AcquisitionError> {
    Ok(Box::new(GpioTrigger::open(pin, width)?))
}

#[cfg(not(feature = "trigger-rppal"))]
fn open_gpio(pin: u8, _width: Duration) -> Result<Box<dyn Trigger>, AcquisitionError> {
    Err(AcquisitionError::unavailable(
        Device::Trigger,
        format!("GPIO{} requires the trigger-rppal feature", pin),
    ))
}
