fn main() {
    std::process::exit(adb_gripper_lib::run());
}
