//! Independent units compiled on independent threads.
//!
//! A unit is owned by exactly one worker. These tests hand whole units to a rayon pool, run the
//! usual pipeline on each (construction, catch preparation, inlining, liveness, numbering) and
//! check that every unit ends up consistent regardless of scheduling.

use irscope::prelude::*;
use rayon::prelude::*;
use rustc_hash::FxHashSet;

/// A counting loop whose body divides an accumulator under a catch-all handler.
fn ladder(id: usize) -> Result<IrCode> {
    let mut code = IrCode::with_method(format!("unit{}", id), IrOptions::testing());
    let mut builder = SsaBuilder::new(&mut code);
    builder.set_position(Position::new(1, format!("unit{}", id)));
    let entry = builder.new_block();
    let header = builder.new_block();
    let body = builder.new_block();
    let exit = builder.new_block();
    let handler = builder.new_block();
    builder.add_edge(entry, header);
    builder.add_edge(header, body);
    builder.add_edge(header, exit);
    builder.add_edge(body, header);
    builder.add_catch_edge(body, handler, CatchGuard::CatchAll);

    builder.set_current_block(entry);
    let limit = builder.add_argument(0, ValueType::Int);
    builder.add_const(1, 0, ValueType::Int);
    builder.add_const(2, 0, ValueType::Int);
    builder.add_goto()?;

    builder.set_current_block(header);
    let counter = builder.read_register(1, ValueType::Int)?;
    builder.add_if(IfCondition::Ge, &[counter, limit])?;

    builder.set_current_block(body);
    let counter = builder.read_register(1, ValueType::Int)?;
    let sum = builder.read_register(2, ValueType::Int)?;
    let step = builder.add_const(3, id as i64 + 1, ValueType::Int);
    builder.add_binop(BinopKind::Add, 1, counter, step, ValueType::Int);
    // The only throwing instruction of the covered body.
    builder.add_binop(BinopKind::Div, 2, sum, step, ValueType::Int);
    builder.add_goto()?;

    builder.set_current_block(exit);
    let sum = builder.read_register(2, ValueType::Int)?;
    builder.add_invoke("consume", &[sum, limit], None);
    builder.add_return(Some(sum))?;

    builder.set_current_block(handler);
    let exception = builder.add_move_exception(5);
    builder.add_throw(exception)?;
    builder.build()?;
    Ok(code)
}

/// `consume(value, limit) { return; }` with a throwing check on the value.
fn consumer() -> Result<IrCode> {
    let mut code = IrCode::with_method("consume", IrOptions::testing());
    let mut builder = SsaBuilder::new(&mut code);
    builder.set_position(Position::new(7, "consume"));
    let entry = builder.new_block();
    builder.set_current_block(entry);
    let value = builder.add_argument(0, ValueType::Int);
    let limit = builder.add_argument(1, ValueType::Int);
    builder.add_binop(BinopKind::Rem, 2, value, limit, ValueType::Int);
    builder.add_return(None)?;
    builder.build()?;
    Ok(code)
}

fn process(id: usize) -> Result<(usize, usize)> {
    let mut code = ladder(id)?;
    code.prepare_blocks_for_catch_handlers()?;

    let invoke = code
        .blocks()
        .iter()
        .flat_map(|&block| code.block(block).instructions().iter().copied())
        .find(|&instr| matches!(code.instruction(instr).kind(), InstructionKind::Invoke { .. }))
        .ok_or_else(|| Error::Error(format!("unit{} has no call", id)))?;
    let mut removed = FxHashSet::default();
    code.cursor_before(invoke)
        .inline_invoke(consumer()?, None, &mut removed, None)?;
    code.debug_check()?;

    let live = code.compute_live_at_entry_sets();
    code.number_instructions();
    Ok((code.blocks().len(), live.len()))
}

#[test]
fn test_units_in_parallel() -> Result<()> {
    let results: Vec<Result<(usize, usize)>> = (0..64).into_par_iter().map(process).collect();

    let sizes: Vec<(usize, usize)> = results.into_iter().collect::<Result<_>>()?;
    // Every unit has the same shape; only the constants differ.
    assert!(sizes.windows(2).all(|pair| pair[0] == pair[1]));
    let (blocks, live) = sizes[0];
    assert!(live <= blocks);
    Ok(())
}

#[test]
fn test_units_in_dedicated_pool() -> Result<()> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(4)
        .build()
        .map_err(|e| Error::Error(e.to_string()))?;

    let sequential: Vec<(usize, usize)> = (0..8).map(process).collect::<Result<_>>()?;
    let parallel: Vec<(usize, usize)> =
        pool.install(|| (0..8).into_par_iter().map(process).collect::<Result<_>>())?;
    assert_eq!(sequential, parallel);
    Ok(())
}
