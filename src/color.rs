//! sRGB, CIEXYZ and CIELab conversions.
//!
//! DICOM stores recommended display colours as CIELab scaled to 16 bit
//! integers (PS3.3 C.10.7.1.1, the same encoding as ICC profiles). The
//! functions here move between that representation and 8 bit sRGB, using the
//! 2° observer with the D65 reference white.

/// Reference white, 2° observer, D65.
const REF_X: f64 = 95.047;
const REF_Y: f64 = 100.000;
const REF_Z: f64 = 108.883;

const LAB_EPSILON: f64 = 0.008856;
const LAB_KAPPA: f64 = 7.787;
const LAB_OFFSET: f64 = 16.0 / 116.0;

/// 8 bit sRGB triplet.
pub type Rgb = [u8; 3];
/// L* in 0..=100, a* and b* in -128..=127.
pub type CieLab = [f64; 3];
/// CIELab scaled to 0..=65535 per component.
pub type ScaledCieLab = [u16; 3];

pub fn xyz_from_srgb(rgb: Rgb) -> [f64; 3] {
    let linear = |c: u8| {
        let v = c as f64 / 255.0;
        let v = if v > 0.04045 {
            ((v + 0.055) / 1.055).powf(2.4)
        } else {
            v / 12.92
        };
        v * 100.0
    };
    let (r, g, b) = (linear(rgb[0]), linear(rgb[1]), linear(rgb[2]));

    [
        r * 0.4124 + g * 0.3576 + b * 0.1805,
        r * 0.2126 + g * 0.7152 + b * 0.0722,
        r * 0.0193 + g * 0.1192 + b * 0.9505,
    ]
}

/// Unclamped sRGB components in 0.0..=1.0 for in-gamut colours.
pub fn srgb_unit_from_xyz(xyz: [f64; 3]) -> [f64; 3] {
    let (x, y, z) = (xyz[0] / 100.0, xyz[1] / 100.0, xyz[2] / 100.0);

    let r = x * 3.2406 + y * -1.5372 + z * -0.4986;
    let g = x * -0.9689 + y * 1.8758 + z * 0.0415;
    let b = x * 0.0557 + y * -0.2040 + z * 1.0570;

    let gamma = |v: f64| {
        if v > 0.0031308 {
            1.055 * v.powf(1.0 / 2.4) - 0.055
        } else {
            12.92 * v
        }
    };
    [gamma(r), gamma(g), gamma(b)]
}

pub fn srgb_from_xyz(xyz: [f64; 3]) -> Rgb {
    srgb_unit_from_xyz(xyz).map(|v| (v * 255.0).round().clamp(0.0, 255.0) as u8)
}

pub fn cielab_from_xyz(xyz: [f64; 3]) -> CieLab {
    let f = |v: f64| {
        if v > LAB_EPSILON {
            v.cbrt()
        } else {
            LAB_KAPPA * v + LAB_OFFSET
        }
    };
    let fx = f(xyz[0] / REF_X);
    let fy = f(xyz[1] / REF_Y);
    let fz = f(xyz[2] / REF_Z);

    [116.0 * fy - 16.0, 500.0 * (fx - fy), 200.0 * (fy - fz)]
}

pub fn xyz_from_cielab(lab: CieLab) -> [f64; 3] {
    let fy = (lab[0] + 16.0) / 116.0;
    let fx = lab[1] / 500.0 + fy;
    let fz = fy - lab[2] / 200.0;

    let finv = |v: f64| {
        let cube = v.powi(3);
        if cube > LAB_EPSILON {
            cube
        } else {
            (v - LAB_OFFSET) / LAB_KAPPA
        }
    };
    [REF_X * finv(fx), REF_Y * finv(fy), REF_Z * finv(fz)]
}

pub fn integer_scaled_cielab_from_cielab(lab: CieLab) -> ScaledCieLab {
    let scale = |v: f64| v.round().clamp(0.0, 65535.0) as u16;
    [
        scale(lab[0] * 65535.0 / 100.0),
        scale((lab[1] + 128.0) * 65535.0 / 255.0),
        scale((lab[2] + 128.0) * 65535.0 / 255.0),
    ]
}

pub fn cielab_from_integer_scaled_cielab(scaled: ScaledCieLab) -> CieLab {
    [
        scaled[0] as f64 / 65535.0 * 100.0,
        scaled[1] as f64 / 65535.0 * 255.0 - 128.0,
        scaled[2] as f64 / 65535.0 * 255.0 - 128.0,
    ]
}

pub fn cielab_from_srgb(rgb: Rgb) -> CieLab {
    cielab_from_xyz(xyz_from_srgb(rgb))
}

pub fn srgb_from_cielab(lab: CieLab) -> Rgb {
    srgb_from_xyz(xyz_from_cielab(lab))
}

pub fn integer_scaled_cielab_from_srgb(rgb: Rgb) -> ScaledCieLab {
    integer_scaled_cielab_from_cielab(cielab_from_srgb(rgb))
}

pub fn srgb_from_integer_scaled_cielab(scaled: ScaledCieLab) -> Rgb {
    srgb_from_cielab(cielab_from_integer_scaled_cielab(scaled))
}

/// sRGB scaled to `0..=max`, as needed for palette lookup tables of a
/// given bit depth.
pub fn scaled_srgb_from_integer_scaled_cielab(scaled: ScaledCieLab, max: u16) -> [u16; 3] {
    let unit = srgb_unit_from_xyz(xyz_from_cielab(cielab_from_integer_scaled_cielab(scaled)));
    unit.map(|v| (v * max as f64).round().clamp(0.0, max as f64) as u16)
}
