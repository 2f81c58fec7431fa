use state_machines::state_machine;

state_machine! {
    name: ProcessingMachine,
    state: ProcessingState,
    initial: Ready,
    states: [Ready, DatasetResolved, StrategyResolved, RecordsCollected, RecordsProcessed, Finalized],
    events {
        resolve_dataset { transition: { from: Ready, to: DatasetResolved } }
        resolve_strategy { transition: { from: DatasetResolved, to: StrategyResolved } }
        collect_records { transition: { from: StrategyResolved, to: RecordsCollected } }
        process_records { transition: { from: RecordsCollected, to: RecordsProcessed } }
        finalize { transition: { from: RecordsProcessed, to: Finalized } }
        skip { transition: { from: RecordsCollected, to: Finalized } }
    }
}

pub fn ready() -> ProcessingMachine<(), Ready> {
    ProcessingMachine::new(())
}
