//! GLSL sources. Compute kernels declare their workgroup size through a
//! `TILE` define that [`with_tile`] rewrites, so one source serves every
//! configured tile.

use pipeline::ProgramStages;

pub const LIFE: &str = include_str!("../shaders/life.comp");
pub const MANDELBROT: &str = include_str!("../shaders/mandelbrot.comp");
pub const WAVES: &str = include_str!("../shaders/waves.comp");
pub const RAYTRACE: &str = include_str!("../shaders/raytrace.comp");
pub const DISPLAY_VERTEX: &str = include_str!("../shaders/display.vert");
pub const DISPLAY_FRAGMENT: &str = include_str!("../shaders/display.frag");

const TILE_DEFINE: &str = "#define TILE 16";

/// Returns `source` with its workgroup edge set to `tile`.
pub fn with_tile(source: &str, tile: u32) -> String {
    source.replacen(TILE_DEFINE, &format!("#define TILE {tile}"), 1)
}

/// Vertex and fragment stages of the full-screen textured quad.
pub fn display_stages() -> ProgramStages {
    ProgramStages::raster(DISPLAY_VERTEX, DISPLAY_FRAGMENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipeline::link_program;

    #[test]
    fn every_kernel_carries_the_tile_define() {
        for source in [LIFE, MANDELBROT, WAVES, RAYTRACE] {
            assert!(source.contains(TILE_DEFINE));
            assert!(with_tile(source, 8).contains("#define TILE 8"));
        }
    }

    #[test]
    fn rewritten_tile_reaches_the_reflected_local_size() {
        let linked = link_program("life", &ProgramStages::compute(with_tile(LIFE, 8)))
            .expect("life links");
        assert_eq!(linked.local_size, Some([8, 8, 1]));
    }

    #[test]
    fn display_program_links() {
        let linked = link_program("display", &display_stages()).expect("display links");
        assert!(linked.interface.slot(0).is_some());
        assert!(linked.interface.slot(1).is_some());
    }
}
