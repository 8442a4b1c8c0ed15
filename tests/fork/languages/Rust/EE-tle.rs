use std::io;
use std::process::Command;

// Runaway recursion interleaved with process creation: never terminates on
// its own, so the judge has to stop it.
fn spawn_forever() -> io::Result<()> {
    spawn_forever()?;
    Command::new("/usr/bin/echo").arg("-n").spawn()?;
    spawn_forever()
}

fn main() -> io::Result<()> {
    loop {
        spawn_forever()?;
    }
}
