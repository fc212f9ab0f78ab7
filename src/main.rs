//! `rtcview` binary entry point.

fn main() -> anyhow::Result<()> {
    rtcview_lib::run()
}
