/// Execute an aggregate command in place: decide, then apply each decided
/// event. No persistence and no publication.
///
/// Domain tests use this to drive an aggregate through a lifecycle; the full
/// pipeline (load, decide, append, publish) lives in the infrastructure
/// command dispatcher.
pub fn execute<A>(aggregate: &mut A, command: &A::Command) -> Result<Vec<A::Event>, A::Error>
where
    A: dentaflow_core::Aggregate,
{
    let events = A::handle(aggregate, command)?;
    for ev in &events {
        A::apply(aggregate, ev);
    }
    Ok(events)
}
