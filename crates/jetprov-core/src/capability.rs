// (major, minor) compute capability of the Jetson GPU generations.
const COMPUTE_CAPABILITY_LABELS: &[((u32, u32), &str)] = &[
    ((5, 3), "Maxwell (Jetson Nano / TX1)"),
    ((6, 2), "Pascal (Jetson TX2)"),
    ((7, 2), "Volta (Jetson Xavier)"),
    ((8, 7), "Ampere (Jetson Orin)"),
    ((10, 1), "Blackwell (Jetson Thor)"),
];

pub fn compute_capability_label(major: u32, minor: u32) -> &'static str {
    COMPUTE_CAPABILITY_LABELS
        .iter()
        .find(|(capability, _)| *capability == (major, minor))
        .map(|(_, label)| *label)
        .unwrap_or("unknown architecture")
}
