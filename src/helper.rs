/// Runs a closure when dropped.
pub struct Defer<F>
where
    F: FnOnce(),
{
    f: Option<F>,
}

impl<F> Defer<F>
where
    F: FnOnce(),
{
    pub fn new(f: F) -> Self {
        Defer { f: Some(f) }
    }
}

impl<F> Drop for Defer<F>
where
    F: FnOnce(),
{
    fn drop(&mut self) {
        if let Some(f) = self.f.take() {
            f();
        }
    }
}
