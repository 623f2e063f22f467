//! CPU renditions of the compute kernels for the software backend. Each one
//! follows its GLSL twin invocation for invocation, so a simulated run shows
//! the same picture the GPU would.

use pipeline::software::{Invocation, SoftwareBackend, Texel};

use crate::catalog::DemoKind;
use crate::params::{CameraParams, MandelbrotParams, TimeParams};

/// Registers every demo kernel under its program label.
pub fn register_all(backend: &mut SoftwareBackend) {
    backend.register_kernel(DemoKind::Life.label(), life);
    backend.register_kernel(DemoKind::Mandelbrot.label(), mandelbrot);
    backend.register_kernel(DemoKind::Waves.label(), waves);
    backend.register_kernel(DemoKind::Raytrace.label(), raytrace);
}

/// A software backend with all demo kernels registered.
pub fn backend() -> SoftwareBackend {
    let mut backend = SoftwareBackend::new();
    register_all(&mut backend);
    backend
}

const LIFE_INPUT: u32 = 0;
const PARAMS: u32 = 1;

pub fn life(inv: &Invocation<'_>) -> Option<Texel> {
    if !inv.in_bounds() {
        return None;
    }
    let (width, height) = inv.size();
    let (width, height) = (width as i32, height as i32);
    let (x, y) = (inv.x() as i32, inv.y() as i32);
    let alive_at = |cx: i32, cy: i32| inv.load(LIFE_INPUT, cx, cy)[0] > 0.5;

    let mut neighbors = 0;
    for dy in -1..=1 {
        for dx in -1..=1 {
            if dx == 0 && dy == 0 {
                continue;
            }
            let cx = (x + dx + width) % width;
            let cy = (y + dy + height) % height;
            if alive_at(cx, cy) {
                neighbors += 1;
            }
        }
    }

    let next = neighbors == 3 || (alive_at(x, y) && neighbors == 2);
    let value = if next { 1.0 } else { 0.0 };
    Some([value, value, value, 1.0])
}

pub fn mandelbrot(inv: &Invocation<'_>) -> Option<Texel> {
    if !inv.in_bounds() {
        return None;
    }
    let params: MandelbrotParams = inv.params(PARAMS);
    let (width, height) = inv.size();
    let mut cx = inv.x() as f32 / width as f32 - 0.5;
    let cy = inv.y() as f32 / height as f32 - 0.5;
    cx *= width as f32 / height as f32;
    let cx = cx * params.scale + params.center[0];
    let cy = cy * params.scale + params.center[1];

    let (mut zx, mut zy) = (0.0f32, 0.0f32);
    let mut escaped = params.max_iterations;
    for i in 0..params.max_iterations {
        let next_x = zx * zx - zy * zy + cx;
        zy = 2.0 * zx * zy + cy;
        zx = next_x;
        if zx * zx + zy * zy > 4.0 {
            escaped = i;
            break;
        }
    }

    if escaped >= params.max_iterations {
        return Some([0.0, 0.0, 0.0, 1.0]);
    }
    let smoothed = escaped as f32 - (zx * zx + zy * zy).log2().log2() + 4.0;
    let [r, g, b] = palette(smoothed / params.max_iterations as f32);
    Some([r, g, b, 1.0])
}

fn palette(t: f32) -> [f32; 3] {
    let boundary = smoothstep(0.7, 0.95, t);
    let blue = [0.1, 0.3, 0.8];
    let yellow = [1.0, 0.85, 0.1];
    let edge_t = smoothstep(0.75, 0.9, t);
    let mut color = [0.0; 3];
    for channel in 0..3 {
        let edge = mix(blue[channel], yellow[channel], edge_t);
        color[channel] = mix(t, edge, boundary * 1.5);
    }
    color
}

pub fn waves(inv: &Invocation<'_>) -> Option<Texel> {
    if !inv.in_bounds() {
        return None;
    }
    let time = inv.params::<TimeParams>(PARAMS).time;
    let (width, height) = inv.size();
    let mut u = inv.x() as f32 / width as f32 * 2.0 - 1.0;
    let v = inv.y() as f32 / height as f32 * 2.0 - 1.0;
    u *= width as f32 / height as f32;

    let dist = (u * u + v * v).sqrt();
    let angle = v.atan2(u);

    let ring = (dist * 10.0 - time * 5.0).sin() * 0.5 + 0.5;
    let spiral = (dist * 15.0 + angle + time * 3.0).sin() * 0.3 + 0.3;
    let petals = (angle * 6.0 + time * 2.0).sin() * 0.2 + 0.2;
    let intensity = ring + spiral + petals;
    let glow = (-dist * 4.0).exp() * 0.4;

    Some([
        intensity * 0.5 + dist * 0.3 + glow,
        intensity * 0.8 + glow,
        intensity * 0.3 + 0.2 + (1.0 - dist) * 0.2 + glow,
        1.0,
    ])
}

type Vec3 = [f32; 3];

const AMBIENT: f32 = 0.3;
const BOUNCE: f32 = 0.5;

fn dot(a: Vec3, b: Vec3) -> f32 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

fn sub(a: Vec3, b: Vec3) -> Vec3 {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

fn normalize(a: Vec3) -> Vec3 {
    let len = dot(a, a).sqrt();
    [a[0] / len, a[1] / len, a[2] / len]
}

fn hit_sphere(origin: Vec3, dir: Vec3, center: Vec3, radius: f32) -> f32 {
    let oc = sub(origin, center);
    let a = dot(dir, dir);
    let b = 2.0 * dot(oc, dir);
    let c = dot(oc, oc) - radius * radius;
    let disc = b * b - 4.0 * a * c;
    if disc < 0.0 {
        return -1.0;
    }
    (-b - disc.sqrt()) / (2.0 * a)
}

pub fn raytrace(inv: &Invocation<'_>) -> Option<Texel> {
    if !inv.in_bounds() {
        return None;
    }
    let camera: CameraParams = inv.params(PARAMS);
    let (width, height) = inv.size();
    let mut u = (inv.x() as f32 + 0.5) / width as f32 * 2.0 - 1.0;
    let v = (inv.y() as f32 + 0.5) / height as f32 * 2.0 - 1.0;
    u *= width as f32 / height as f32;
    let origin = camera.camera_pos;
    let dir = normalize([u, v, -1.0]);

    let spheres: [(Vec3, f32, Vec3); 4] = [
        ([0.0, camera.time.sin() * BOUNCE, -5.0], 1.0, [1.0, 0.3, 0.3]),
        ([-2.5, 0.0, -5.0], 0.8, [0.3, 1.0, 0.3]),
        ([2.5, 0.0, -5.0], 0.8, [0.3, 0.3, 1.0]),
        ([0.0, -101.0, -5.0], 100.0, [0.8, 0.8, 0.8]),
    ];

    let mut closest = f32::INFINITY;
    let mut hit = None;
    for (index, (center, radius, _)) in spheres.iter().enumerate() {
        let t = hit_sphere(origin, dir, *center, *radius);
        if t > 0.0 && t < closest {
            closest = t;
            hit = Some(index);
        }
    }

    let color = match hit {
        None => {
            let gradient = dir[1] * 0.5 + 0.5;
            [
                mix(1.0, 0.5, gradient),
                mix(1.0, 0.7, gradient),
                mix(1.0, 1.0, gradient),
            ]
        }
        Some(index) => {
            let (center, _, albedo) = spheres[index];
            let point = [
                origin[0] + dir[0] * closest,
                origin[1] + dir[1] * closest,
                origin[2] + dir[2] * closest,
            ];
            let normal = normalize(sub(point, center));
            let diffuse = dot(normal, normalize([0.5, 1.0, 0.3])).max(0.0);
            albedo.map(|channel| channel * AMBIENT + channel * diffuse)
        }
    };
    Some([color[0], color[1], color[2], 1.0])
}

fn mix(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

fn smoothstep(edge0: f32, edge1: f32, x: f32) -> f32 {
    let t = ((x - edge0) / (edge1 - edge0)).clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{DemoKind, DemoOptions, Seeding};
    use crate::seed::Pattern;
    use pipeline::{FrameLoop, KeyBindings};
    use std::time::{Duration, Instant};

    fn small(kind: DemoKind) -> DemoOptions {
        let mut options = DemoOptions::defaults(kind);
        options.size = (5, 5);
        options.tile = 4;
        options
    }

    fn front_cells(frame_loop: &FrameLoop, backend: &SoftwareBackend) -> Vec<bool> {
        backend
            .texels(frame_loop.latest_image())
            .expect("front buffer")
            .iter()
            .map(|texel| texel[0] > 0.5)
            .collect()
    }

    fn cells(width: usize, alive: &[(usize, usize)]) -> Vec<bool> {
        let mut grid = vec![false; width * width];
        for &(x, y) in alive {
            grid[y * width + x] = true;
        }
        grid
    }

    #[test]
    fn blinker_oscillates_with_period_two() {
        let mut options = small(DemoKind::Life);
        options.seeding = Seeding::Pattern(Pattern::Blinker);
        options.step = pipeline::StepSchedule::new(Duration::from_millis(100), 4);
        let mut backend = backend();
        let mut frame_loop = FrameLoop::new(
            &mut backend,
            DemoKind::Life.loop_spec(&options),
            KeyBindings::default(),
        )
        .expect("life loop");

        let horizontal = cells(5, &[(1, 2), (2, 2), (3, 2)]);
        let vertical = cells(5, &[(2, 1), (2, 2), (2, 3)]);

        let start = Instant::now();
        frame_loop.iterate(&mut backend, [], start).expect("first");
        assert_eq!(front_cells(&frame_loop, &backend), horizontal);

        frame_loop
            .iterate(&mut backend, [], start + Duration::from_millis(100))
            .expect("second");
        assert_eq!(frame_loop.generation(), Some(1));
        assert_eq!(front_cells(&frame_loop, &backend), vertical);

        frame_loop
            .iterate(&mut backend, [], start + Duration::from_millis(200))
            .expect("third");
        assert_eq!(frame_loop.generation(), Some(2));
        assert_eq!(front_cells(&frame_loop, &backend), horizontal);
        assert!(backend.hazards().is_empty());
    }

    #[test]
    fn mandelbrot_interior_is_black_and_exterior_is_not() {
        let mut options = small(DemoKind::Mandelbrot);
        options.size = (4, 4);
        let mut backend = backend();
        let frame_loop = FrameLoop::new(
            &mut backend,
            DemoKind::Mandelbrot.loop_spec(&options),
            KeyBindings::default(),
        )
        .expect("mandelbrot loop");

        let texels = backend.texels(frame_loop.latest_image()).expect("output");
        assert_eq!(texels[2 * 4 + 2], [0.0, 0.0, 0.0, 1.0]);
        assert!(texels[0][0] > 0.0);
    }

    #[test]
    fn raytracer_hits_the_red_sphere_and_sees_sky_above() {
        let mut options = small(DemoKind::Raytrace);
        options.size = (9, 9);
        let mut backend = backend();
        let mut frame_loop = FrameLoop::new(
            &mut backend,
            DemoKind::Raytrace.loop_spec(&options),
            KeyBindings::default(),
        )
        .expect("raytrace loop");
        frame_loop
            .iterate(&mut backend, [], Instant::now())
            .expect("frame");

        let texels = backend.texels(frame_loop.latest_image()).expect("output");
        let center = texels[4 * 9 + 4];
        assert!(center[0] > 2.0 * center[1], "center {center:?}");
        let top = texels[8 * 9 + 4];
        assert!(top[2] > top[0], "top {top:?}");
    }

    #[test]
    fn smoothstep_matches_glsl_edges() {
        assert_eq!(smoothstep(0.0, 1.0, -1.0), 0.0);
        assert_eq!(smoothstep(0.0, 1.0, 2.0), 1.0);
        assert_eq!(smoothstep(0.0, 1.0, 0.5), 0.5);
    }
}
