//! Uniform block layouts shared by the GLSL kernels and their software
//! renditions. Every block is 16 bytes and laid out for std140.

use std::time::Duration;

use bytemuck::{Pod, Zeroable};
use pipeline::ParamsEncoder;

/// `TimeBlock { float uTime; }`
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct TimeParams {
    pub time: f32,
    pub _pad: [f32; 3],
}

impl TimeParams {
    pub fn new(time: f32) -> Self {
        Self {
            time,
            _pad: [0.0; 3],
        }
    }
}

/// `CameraBlock { vec3 uCameraPos; float uTime; }`
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct CameraParams {
    pub camera_pos: [f32; 3],
    pub time: f32,
}

/// `FractalBlock { vec2 uCenter; float uScale; uint uMaxIterations; }`
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct MandelbrotParams {
    pub center: [f32; 2],
    pub scale: f32,
    pub max_iterations: u32,
}

impl Default for MandelbrotParams {
    fn default() -> Self {
        Self {
            center: [-0.5, 0.0],
            scale: 2.5,
            max_iterations: 512,
        }
    }
}

/// Feeds the waves kernel the accumulated animation time.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimeEncoder;

impl ParamsEncoder for TimeEncoder {
    fn size(&self) -> usize {
        std::mem::size_of::<TimeParams>()
    }

    fn encode(&mut self, elapsed: Duration) -> Vec<u8> {
        bytemuck::bytes_of(&TimeParams::new(elapsed.as_secs_f32())).to_vec()
    }
}

/// Feeds the raytracer a fixed camera and the accumulated time that drives
/// the bouncing sphere.
#[derive(Debug, Clone, Copy)]
pub struct CameraEncoder {
    pub camera_pos: [f32; 3],
}

impl ParamsEncoder for CameraEncoder {
    fn size(&self) -> usize {
        std::mem::size_of::<CameraParams>()
    }

    fn encode(&mut self, elapsed: Duration) -> Vec<u8> {
        let params = CameraParams {
            camera_pos: self.camera_pos,
            time: elapsed.as_secs_f32(),
        };
        bytemuck::bytes_of(&params).to_vec()
    }
}
