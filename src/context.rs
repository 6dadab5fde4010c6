//! Explicit execution context handed to the model builder and the driver.

use core::fmt;
use core::str::FromStr;

use burn::prelude::*;
use burn_ndarray::NdArrayDevice;
use log::debug;
use rand::{rngs::StdRng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Device family requested by a run configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceTarget {
    Cpu,
    Gpu,
    Ascend,
}

impl fmt::Display for DeviceTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeviceTarget::Cpu => "CPU",
            DeviceTarget::Gpu => "GPU",
            DeviceTarget::Ascend => "Ascend",
        };
        f.write_str(name)
    }
}

impl FromStr for DeviceTarget {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "cpu" => Ok(DeviceTarget::Cpu),
            "gpu" | "cuda" => Ok(DeviceTarget::Gpu),
            "ascend" => Ok(DeviceTarget::Ascend),
            _ => Err(Error::UnknownDevice(s.to_string())),
        }
    }
}

// Mixed into the seed so that each consumer draws from its own stream.
const STREAM_MIX: u64 = 0x9E37_79B9_7F4A_7C15;

/// Device and seed shared by every step of a run.
#[derive(Debug, Clone)]
pub struct ExecutionContext<B: Backend> {
    target: DeviceTarget,
    device: B::Device,
    seed: u64,
}

impl<B: Backend> ExecutionContext<B> {
    /// Builds a context on an already selected device and seeds the backend.
    pub fn new(target: DeviceTarget, device: B::Device, seed: u64) -> Self {
        B::seed(&device, seed);
        debug!("Contexte d'exécution: cible={target}, seed={seed}");
        Self {
            target,
            device,
            seed,
        }
    }

    pub fn target(&self) -> DeviceTarget {
        self.target
    }

    pub fn device(&self) -> &B::Device {
        &self.device
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Host-side random generator for the given stream.
    pub fn rng(&self, stream: u64) -> StdRng {
        StdRng::seed_from_u64(self.seed ^ stream.wrapping_mul(STREAM_MIX))
    }
}

impl<B: Backend<Device = NdArrayDevice>> ExecutionContext<B> {
    /// Resolves a target against the ndarray backend, which only runs on the CPU.
    pub fn ndarray(target: DeviceTarget, seed: u64) -> Result<Self> {
        match target {
            DeviceTarget::Cpu => Ok(Self::new(target, NdArrayDevice::Cpu, seed)),
            other => Err(Error::UnsupportedDevice(other)),
        }
    }
}
