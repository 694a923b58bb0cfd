use pobj_backend::ChangeEvent;

/// Observer of external changes applied to a persistent object.
///
/// Called once per applied change, after the cached value has been replaced
/// and its lock released, so the delegate may read the object.
pub trait ObjectDelegate<T>: Send + Sync {
    fn did_apply_external_change(&self, event: &ChangeEvent<T>);
}

impl<T, F> ObjectDelegate<T> for F
where
    F: Fn(&ChangeEvent<T>) + Send + Sync,
{
    fn did_apply_external_change(&self, event: &ChangeEvent<T>) {
        self(event)
    }
}
