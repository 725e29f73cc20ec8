pub const SOCKET_PATH: &str = "/dev/socket/mpgpu.sock";
pub const CONFIG_DIR: &str = "/data/adb/.config/mpgpu";
